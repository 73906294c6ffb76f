//! Decodes containers assembled field by field, independently of the encoder.

use aomr_asset::{
    probe,
    rotation::PackedRotation,
    tma::{self, PositionKeys, RotationKeys},
    tmm, ContainerKind, DecodeParams, FormatError, RotationSignPolicy,
};
use glam::{Quat, Vec3};

#[derive(Default)]
struct Builder {
    bytes: Vec<u8>,
}

impl Builder {
    fn u8(mut self, value: u8) -> Self {
        self.bytes.push(value);
        self
    }

    fn u16(mut self, value: u16) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn u32(mut self, value: u32) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn i32(mut self, value: i32) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn u64(mut self, value: u64) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    fn f32s(mut self, values: &[f32]) -> Self {
        for value in values {
            self.bytes.extend_from_slice(&value.to_le_bytes());
        }
        self
    }

    fn string(self, value: &str) -> Self {
        let units: Vec<u16> = value.encode_utf16().collect();
        let mut builder = self.u32(units.len() as u32);
        for unit in units {
            builder = builder.u16(unit);
        }
        builder
    }

    fn identity(self) -> Self {
        self.f32s(&glam::Mat4::IDENTITY.to_cols_array())
    }

    fn header(self, magic: u32, version: u32) -> Self {
        self.u32(magic).u32(version).u16(20548)
    }

    /// Import block holding zero entries.
    fn empty_import(self) -> Self {
        self.u32(4).u32(0)
    }

    fn build(self) -> Vec<u8> {
        self.bytes
    }
}

const AFFINE_IDENTITY: [f32; 12] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0,
];

/// Header, summary and bone table of a two-frame clip with one track.
fn animation_head(parents: &[i32], attachment_count: u32) -> Builder {
    let mut builder = Builder::default()
        .header(1095586882, 12)
        .empty_import()
        .u32(1)
        .u32(2)
        .f32s(&[1.0 / 15.0])
        .f32s(&[0.0, 0.0, 0.0])
        .f32s(&[0.0, 0.0, 0.0])
        .u32(parents.len() as u32)
        .u32(attachment_count);
    for (index, parent) in parents.iter().enumerate() {
        builder = builder
            .string(&format!("bone{}", index))
            .i32(*parent)
            .identity()
            .identity()
            .identity();
    }
    builder
}

/// Track header for `bone0` with the given channel modes over two frames.
fn track_head(builder: Builder, position_mode: u8, rotation_mode: u8) -> Builder {
    builder
        .string("bone0")
        .u8(1)
        .u8(position_mode)
        .u8(rotation_mode)
        .u8(0)
        .u32(2)
}

fn static_track(builder: Builder, position: [f32; 4], rotation: [f32; 4]) -> Builder {
    track_head(builder, 0, 0)
        .f32s(&position)
        .f32s(&rotation)
        .f32s(&[1.0; 4])
}

fn animation_tail(builder: Builder) -> Vec<u8> {
    builder.u32(0).u32(0).build()
}

fn minimal_animation() -> Vec<u8> {
    let policy = RotationSignPolicy::Mirrored;
    let first = PackedRotation::encode(Quat::IDENTITY, policy).unwrap().raw();
    let second = PackedRotation::encode(Quat::from_rotation_z(0.5), policy)
        .unwrap()
        .raw();
    let builder = track_head(animation_head(&[-1], 0), 0, 3)
        .f32s(&[0.0, 2.0, 0.0, 1.0])
        .u32(16)
        .u64(first)
        .u64(second)
        .f32s(&[1.0, 1.0, 1.0, 1.0]);
    animation_tail(builder)
}

struct MeshLayout {
    parents: Vec<i32>,
    attachment_count: u32,
    thing_count: u32,
    triangles_start: u32,
}

impl Default for MeshLayout {
    fn default() -> Self {
        Self {
            parents: Vec::new(),
            attachment_count: 0,
            thing_count: 0,
            triangles_start: 48,
        }
    }
}

/// A three-vertex, one-triangle mesh with a single group.
///
/// Declared attachment and thing counts are written as given but no
/// records follow them.
fn mesh(layout: &MeshLayout) -> Vec<u8> {
    let mut builder = Builder::default()
        .header(1296913474, 35)
        .empty_import()
        .f32s(&[0.0, 0.0, 0.0, 1.0, 1.0, 0.0])
        .f32s(&[0.0, 0.0, 0.0, 1.0, 1.0, 0.0])
        .f32s(&[1.0])
        // groups, materials, techniques, bones, reserved, attachments
        .u32(1)
        .u32(1)
        .u32(1)
        .u32(layout.parents.len() as u32)
        .u32(0)
        .u32(layout.attachment_count)
        // vertices, triangle vertices
        .u32(3)
        .u32(3)
        // byte ranges
        .u32(0)
        .u32(48)
        .u32(layout.triangles_start)
        .u32(6);
    for _ in 0..5 {
        builder = builder.u32(0).u32(0);
    }
    builder = builder
        .u8(0)
        .u8(1)
        .f32s(&AFFINE_IDENTITY)
        // mesh group
        .u32(0)
        .u32(0)
        .u32(3)
        .u32(3)
        .u32(0)
        .u32(1)
        .string("stone")
        .string("default");
    for (index, parent) in layout.parents.iter().enumerate() {
        builder = builder
            .string(&format!("bone{}", index))
            .i32(*parent)
            .f32s(&[0.0, 0.0, 0.0, 0.5])
            .identity()
            .identity()
            .identity();
    }
    builder = builder.u32(layout.thing_count);
    if !layout.parents.is_empty() {
        builder = builder.u8(0).u8(0).u8(0).u8(0);
    }
    builder
        // marked trailer
        .u8(0)
        .u16(22614)
        .u32(1)
        // no heightmap
        .u8(0)
        .build()
}

fn violation_field(result: Result<impl std::fmt::Debug, FormatError>) -> String {
    match result {
        Err(FormatError::FormatInvariantViolation { field, .. }) => field,
        other => panic!("expected a violation, got {:?}", other),
    }
}

#[test]
fn minimal_animation_decodes() {
    let bytes = minimal_animation();
    assert_eq!(probe(&bytes).unwrap(), ContainerKind::Animation);

    let file = tma::decode(&bytes).unwrap();
    assert_eq!(file.frame_count, 2);
    assert_eq!(file.bones.len(), 1);
    assert!(file.bones[0].parent.is_root());
    assert!(file.attachments.is_empty());

    assert_eq!(file.tracks.len(), 1);
    let track = &file.tracks[0];
    assert_eq!(
        track.position,
        PositionKeys::Static {
            position: Vec3::new(0.0, 2.0, 0.0),
            w: 1.0
        }
    );
    let RotationKeys::Animated(frames) = &track.rotation else {
        panic!("expected animated rotation, got {:?}", track.rotation);
    };
    assert_eq!(frames.len(), 2);

    let rotations = track.rotations(file.frame_count, RotationSignPolicy::Mirrored);
    assert!(rotations[0].abs_diff_eq(Quat::IDENTITY, 1e-4));
    assert!(rotations[1].abs_diff_eq(Quat::from_rotation_z(0.5), 1e-4));
}

#[test]
fn animation_round_trips_byte_for_byte() {
    let bytes = minimal_animation();
    let file = tma::decode(&bytes).unwrap();
    assert_eq!(tma::encode(&file).unwrap(), bytes);
    assert_eq!(tma::decode(&tma::encode(&file).unwrap()).unwrap(), file);
}

#[test]
fn static_track_decodes() {
    let bytes = animation_tail(static_track(
        animation_head(&[-1], 0),
        [1.0, 2.0, 3.0, 1.0],
        [0.0, 0.0, 0.0, -1.0],
    ));
    let file = tma::decode(&bytes).unwrap();
    assert_eq!(
        file.tracks[0].rotation.at(1, RotationSignPolicy::Mirrored),
        Some(Quat::IDENTITY)
    );
}

#[test]
fn static_position_w_must_be_one() {
    let bytes = animation_tail(static_track(
        animation_head(&[-1], 0),
        [1.0, 2.0, 3.0, 0.5],
        [0.0, 0.0, 0.0, 1.0],
    ));
    let field = violation_field(tma::decode(&bytes));
    assert!(field.contains("static position w"), "{}", field);
}

#[test]
fn static_rotation_must_be_unit() {
    let bytes = animation_tail(static_track(
        animation_head(&[-1], 0),
        [0.0, 0.0, 0.0, 1.0],
        [0.0, 0.0, 0.5, 0.5],
    ));
    let field = violation_field(tma::decode(&bytes));
    assert!(field.contains("static rotation"), "{}", field);
}

#[test]
fn animation_bone_cycle_is_rejected() {
    let bytes = animation_tail(static_track(
        animation_head(&[1, 0], 0),
        [0.0, 0.0, 0.0, 1.0],
        [0.0, 0.0, 0.0, 1.0],
    ));
    assert_eq!(violation_field(tma::decode(&bytes)), "bone hierarchy");

    let bytes = animation_tail(static_track(
        animation_head(&[0], 0),
        [0.0, 0.0, 0.0, 1.0],
        [0.0, 0.0, 0.0, 1.0],
    ));
    let field = violation_field(tma::decode(&bytes));
    assert!(field.contains("parent of bone"), "{}", field);
}

#[test]
fn oversized_attachment_count_is_rejected_before_reading() {
    let bytes = static_track(
        animation_head(&[-1], u32::MAX),
        [0.0, 0.0, 0.0, 1.0],
        [0.0, 0.0, 0.0, 1.0],
    )
    .u32(u32::MAX)
    .u32(0)
    .build();

    let field = violation_field(tma::decode(&bytes));
    assert_eq!(field, "attachment count");

    let unbounded = DecodeParams {
        max_table_len: u32::MAX,
        ..Default::default()
    };
    assert!(matches!(
        tma::decode_with(&bytes, &unbounded),
        Err(FormatError::UnexpectedEndOfBuffer { .. })
    ));
}

#[test]
fn wrong_magic_is_a_violation() {
    let mut bytes = minimal_animation();
    bytes[0] ^= 0xff;
    assert!(matches!(
        tma::decode(&bytes),
        Err(FormatError::FormatInvariantViolation { offset: 0, .. })
    ));
    assert!(probe(&bytes).is_err());
}

#[test]
fn wrong_version_is_unsupported() {
    let mut bytes = minimal_animation();
    bytes[4] = 13;
    assert!(matches!(
        tma::decode(&bytes),
        Err(FormatError::UnsupportedVersion {
            kind: ContainerKind::Animation,
            expected: 12,
            actual: 13,
        })
    ));
}

#[test]
fn mesh_is_not_an_animation() {
    let bytes = mesh(&MeshLayout::default());
    assert!(matches!(
        tma::decode(&bytes),
        Err(FormatError::FormatInvariantViolation { .. })
    ));
}

#[test]
fn minimal_mesh_decodes() {
    let bytes = mesh(&MeshLayout::default());
    assert_eq!(probe(&bytes).unwrap(), ContainerKind::Mesh);

    let file = tmm::decode(&bytes).unwrap();
    assert_eq!(file.vertex_count, 3);
    assert_eq!(file.triangle_count, 1);
    assert_eq!(file.mesh_groups.len(), 1);
    let group = file.mesh_groups[0];
    assert_eq!(group.vertex_count, 3);
    assert_eq!(group.triangle_count(), 1);
    assert_eq!(file.materials, vec!["stone".to_string()]);
    assert_eq!(file.trailer_marker, tmm::TrailerMarker::Vx);
    assert!(file.bone_trailer.is_none());
    assert!(file.heightmap.is_none());

    assert_eq!(tmm::encode(&file).unwrap(), bytes);
}

#[test]
fn skinned_mesh_decodes() {
    let bytes = mesh(&MeshLayout {
        parents: vec![-1, 0],
        ..Default::default()
    });
    let file = tmm::decode(&bytes).unwrap();
    assert_eq!(file.skeleton().children(0).collect::<Vec<_>>(), vec![1]);
    assert!(file.bone_trailer.is_some());
    assert_eq!(tmm::encode(&file).unwrap(), bytes);
}

#[test]
fn mesh_bone_cycle_is_rejected() {
    let bytes = mesh(&MeshLayout {
        parents: vec![1, 0],
        ..Default::default()
    });
    assert_eq!(violation_field(tmm::decode(&bytes)), "bone hierarchy");
}

#[test]
fn mesh_table_counts_are_capped() {
    let over_cap = DecodeParams::default().max_table_len + 1;

    let bytes = mesh(&MeshLayout {
        attachment_count: over_cap,
        ..Default::default()
    });
    assert_eq!(violation_field(tmm::decode(&bytes)), "attachment count");

    let bytes = mesh(&MeshLayout {
        thing_count: over_cap,
        ..Default::default()
    });
    assert_eq!(violation_field(tmm::decode(&bytes)), "thing count");
}

#[test]
fn mesh_with_misplaced_triangles_is_rejected() {
    let bytes = mesh(&MeshLayout {
        triangles_start: 40,
        ..Default::default()
    });
    match tmm::decode(&bytes) {
        Err(FormatError::FormatInvariantViolation {
            field, expected, ..
        }) => {
            assert!(field.contains("triangles.start"), "{}", field);
            assert!(expected.contains("vertices.length"), "{}", expected);
        }
        other => panic!("expected a violation, got {:?}", other),
    }
}

#[test]
fn trailing_bytes_are_rejected_unless_allowed() {
    let mut bytes = minimal_animation();
    bytes.push(0);
    assert!(tma::decode(&bytes).is_err());

    let params = DecodeParams {
        reject_trailing_bytes: false,
        ..Default::default()
    };
    assert!(tma::decode_with(&bytes, &params).is_ok());
}

#[test]
fn mesh_geometry_decodes_against_container() {
    let file = tmm::decode(&mesh(&MeshLayout::default())).unwrap();

    let mut builder = Builder::default();
    for position in [[0.0f32, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]] {
        for value in position {
            builder = builder.u16(half::f16::from_f32(value).to_bits());
        }
        // uv, then bitangent, normal and tangent words
        builder = builder.u16(0).u16(0).u16(0).u16(0xc000).u16(0);
    }
    let bytes = builder.u16(0).u16(2).u16(1).build();

    let data = tmm::decode_data(&bytes, &file).unwrap();
    assert_eq!(data.vertices.len(), 3);
    assert_eq!(data.vertices[1].position(), Vec3::X);
    assert_eq!(data.vertices[0].frame.normal(), Vec3::Z);
    assert_eq!(data.triangle_indices(&file), vec![[0, 2, 1]]);
    assert!(data.weights.is_none());
    assert_eq!(tmm::encode_data(&data, &file).unwrap(), bytes);

    assert!(matches!(
        tmm::decode_data(&bytes[..bytes.len() - 2], &file),
        Err(FormatError::UnexpectedEndOfBuffer { .. })
    ));
}
