//! Mesh container (`.tmm`) and its geometry buffer (`.tmm.data`).
//!
//! The container describes the mesh and where each block of the geometry
//! buffer lives; the buffer itself only holds fixed-size records and is
//! decoded against an already decoded [`MeshFile`].

use glam::Mat4;
use log::{debug, warn};

use crate::{
    constants::ContainerKind,
    cursor::{decode_bool, table_len, Emitter, Utf16Name, Walker},
    error::{FormatError, Violation},
    header::{ContainerHeader, ImportMetadata},
    skeleton::{Bone, Skeleton, COLLISION_SIZE, MIN_BONE_SIZE},
    DecodeParams,
};

mod data;
mod format;

pub use data::{decode_data, decode_data_with, encode_data, MeshData, Triangle, Vertex, VertexWeights};
use format::{MarkedTrailer, MeshSummary, MESH_GROUP_SIZE, MIN_ATTACHMENT_SIZE, THING_SIZE};
pub use format::{
    validate_mesh_groups, BoneTrailer, BoundingBox, ByteRange, ByteRangeTable, Heightmap,
    MeshAttachment, MeshGroup, ThingEntry, TrailerMarker, Transform3x4,
};

#[derive(Debug, Clone, PartialEq)]
pub struct MeshFile {
    pub import_metadata: ImportMetadata,
    pub bounding_box: BoundingBox,
    pub animated_bounding_box: BoundingBox,
    pub scale: f32,
    pub vertex_count: u32,
    pub triangle_count: u32,
    pub byte_ranges: ByteRangeTable,
    pub transform: Transform3x4,
    pub attachments: Vec<MeshAttachment>,
    pub mesh_groups: Vec<MeshGroup>,
    pub materials: Vec<String>,
    pub shader_techniques: Vec<String>,
    pub bones: Vec<Bone>,
    pub things: Vec<ThingEntry>,
    /// Present exactly when the mesh has bones.
    pub bone_trailer: Option<BoneTrailer>,
    pub trailer_marker: TrailerMarker,
    pub heightmap: Option<Heightmap>,
}

impl MeshFile {
    /// A mesh with no geometry, laid out with empty byte ranges.
    pub fn new() -> Self {
        Self {
            import_metadata: ImportMetadata::empty(),
            bounding_box: BoundingBox::default(),
            animated_bounding_box: BoundingBox::default(),
            scale: 1.0,
            vertex_count: 0,
            triangle_count: 0,
            byte_ranges: ByteRangeTable::default(),
            transform: Transform3x4::IDENTITY,
            attachments: Vec::new(),
            mesh_groups: Vec::new(),
            materials: Vec::new(),
            shader_techniques: Vec::new(),
            bones: Vec::new(),
            things: Vec::new(),
            bone_trailer: None,
            trailer_marker: TrailerMarker::default(),
            heightmap: None,
        }
    }

    pub fn skeleton(&self) -> Skeleton<'_> {
        Skeleton::new(&self.bones)
    }

    pub fn transform_matrix(&self) -> Mat4 {
        self.transform.to_mat4()
    }

    /// Index of the mesh group drawing triangle `triangle`.
    pub fn mesh_group_for_triangle(&self, triangle: usize) -> Option<usize> {
        self.mesh_groups
            .iter()
            .position(|group| group.triangles().contains(&triangle))
    }

    /// Recomputes the byte-range table from the counts and the optional
    /// blocks currently declared.
    pub fn relayout(&mut self) -> Result<(), FormatError> {
        self.byte_ranges = ByteRangeTable::for_layout(
            self.vertex_count,
            self.triangle_count,
            self.byte_ranges.has_weights(),
            self.byte_ranges.has_heights(),
        )
        .ok_or_else(|| FormatError::out_of_range("geometry buffer size", self.vertex_count))?;
        Ok(())
    }

    fn summary(&self) -> Result<MeshSummary, FormatError> {
        let triangle_vertex_count = self
            .triangle_count
            .checked_mul(3)
            .ok_or_else(|| FormatError::out_of_range("triangle count", self.triangle_count))?;
        Ok(MeshSummary {
            bounding_box: self.bounding_box,
            animated_bounding_box: self.animated_bounding_box,
            scale: self.scale,
            mesh_group_count: table_len("mesh group", self.mesh_groups.len())?,
            material_count: table_len("material", self.materials.len())?,
            shader_technique_count: table_len("shader technique", self.shader_techniques.len())?,
            bone_count: table_len("bone", self.bones.len())?,
            attachment_count: table_len("attachment", self.attachments.len())?,
            vertex_count: self.vertex_count,
            triangle_vertex_count,
            byte_ranges: self.byte_ranges,
            transform: self.transform,
        })
    }
}

impl Default for MeshFile {
    fn default() -> Self {
        Self::new()
    }
}

pub fn decode(bytes: &[u8]) -> Result<MeshFile, FormatError> {
    decode_with(bytes, &DecodeParams::default())
}

pub fn decode_with(bytes: &[u8], params: &DecodeParams) -> Result<MeshFile, FormatError> {
    let mut walker = Walker::new(bytes, params);

    let header: ContainerHeader = walker.read()?;
    header.check(ContainerKind::Mesh)?;
    let import_metadata: ImportMetadata = walker.read()?;
    debug!("Import metadata: {} bytes", import_metadata.bytes.len());

    let summary_offset = walker.offset();
    let summary: MeshSummary = walker.read()?;
    let triangle_count = summary.triangle_vertex_count / 3;
    walker.check_at(
        summary_offset,
        summary
            .byte_ranges
            .validate(summary.vertex_count, triangle_count),
    )?;
    debug!(
        "Mesh: {} vertices, {} triangles, {} groups, {} materials, {} bones, {} attachments",
        summary.vertex_count,
        triangle_count,
        summary.mesh_group_count,
        summary.material_count,
        summary.bone_count,
        summary.attachment_count
    );

    walker.ensure_table("attachment", summary.attachment_count, MIN_ATTACHMENT_SIZE)?;
    let mut attachments = Vec::with_capacity(summary.attachment_count as usize);
    let mut attachment_offsets = Vec::with_capacity(summary.attachment_count as usize);
    for _ in 0..summary.attachment_count {
        attachment_offsets.push(walker.offset());
        attachments.push(walker.read::<MeshAttachment>()?);
    }

    let groups_offset = walker.offset();
    let mesh_groups: Vec<MeshGroup> =
        walker.read_table("mesh group", summary.mesh_group_count, MESH_GROUP_SIZE)?;

    let materials: Vec<Utf16Name> = walker.read_table("material", summary.material_count, 4)?;
    let shader_techniques: Vec<Utf16Name> =
        walker.read_table("shader technique", summary.shader_technique_count, 4)?;
    walker.check_at(
        groups_offset,
        validate_mesh_groups(
            &mesh_groups,
            summary.vertex_count,
            summary.triangle_vertex_count,
            materials.len(),
        ),
    )?;

    let bones_offset = walker.offset();
    let bones: Vec<Bone> = walker.read_table_args(
        "bone",
        summary.bone_count,
        MIN_BONE_SIZE + COLLISION_SIZE,
        (true,),
    )?;
    walker.check_at(bones_offset, Skeleton::new(&bones).validate())?;
    for (attachment, offset) in attachments.iter().zip(attachment_offsets) {
        walker.check_at(offset, attachment.validate(bones.len()))?;
    }

    let thing_count: u32 = walker.read()?;
    let things: Vec<ThingEntry> = walker.read_table("thing", thing_count, THING_SIZE)?;
    debug!("Read {} bones and {} thing entries", bones.len(), things.len());

    let bone_trailer = if bones.is_empty() {
        None
    } else {
        let trailer: BoneTrailer = walker.read()?;
        if trailer.reserved != [0; 3] {
            warn!("Bone trailer has unusual reserved bytes {:?}", trailer.reserved);
        }
        Some(trailer)
    };

    let trailer: MarkedTrailer = walker.read()?;

    let flag_offset = walker.offset();
    let has_heightmap: u8 = walker.read()?;
    let has_heightmap =
        decode_bool("heightmap flag", has_heightmap).map_err(|violation| violation.at(flag_offset))?;
    let heightmap = if has_heightmap {
        let heightmap: Heightmap = walker.read()?;
        debug!("Heightmap: {}x{}", heightmap.width, heightmap.width);
        Some(heightmap)
    } else {
        None
    };
    walker.finish()?;

    Ok(MeshFile {
        import_metadata,
        bounding_box: summary.bounding_box,
        animated_bounding_box: summary.animated_bounding_box,
        scale: summary.scale,
        vertex_count: summary.vertex_count,
        triangle_count,
        byte_ranges: summary.byte_ranges,
        transform: summary.transform,
        attachments,
        mesh_groups,
        materials: materials.into_iter().map(|name| name.0).collect(),
        shader_techniques: shader_techniques.into_iter().map(|name| name.0).collect(),
        bones,
        things,
        bone_trailer,
        trailer_marker: trailer.marker,
        heightmap,
    })
}

pub fn encode(file: &MeshFile) -> Result<Vec<u8>, FormatError> {
    let summary = file.summary()?;
    let mut emitter = Emitter::new();

    emitter.write(&ContainerHeader::new(ContainerKind::Mesh))?;
    emitter.write(&file.import_metadata)?;
    emitter.check(file.byte_ranges.validate(file.vertex_count, file.triangle_count))?;
    emitter.write(&summary)?;

    let skeleton = Skeleton::new(&file.bones);
    for attachment in &file.attachments {
        emitter.check(attachment.validate(file.bones.len()))?;
        emitter.write(attachment)?;
    }

    emitter.check(validate_mesh_groups(
        &file.mesh_groups,
        file.vertex_count,
        summary.triangle_vertex_count,
        file.materials.len(),
    ))?;
    emitter.write_all(&file.mesh_groups)?;
    for name in file.materials.iter().chain(&file.shader_techniques) {
        emitter.write(&Utf16Name(name.clone()))?;
    }

    emitter.check(skeleton.validate())?;
    emitter.check(skeleton.validate_collision(true))?;
    for bone in &file.bones {
        emitter.write_args(bone, (true,))?;
    }

    emitter.write(&table_len("thing", file.things.len())?)?;
    emitter.write_all(&file.things)?;

    emitter.check(bone_trailer_presence(file))?;
    if let Some(trailer) = &file.bone_trailer {
        emitter.check(trailer.validate())?;
        emitter.write(trailer)?;
    }

    emitter.write(&MarkedTrailer {
        marker: file.trailer_marker,
    })?;

    match &file.heightmap {
        Some(heightmap) => {
            emitter.check(heightmap.validate())?;
            emitter.write(&1u8)?;
            emitter.write(heightmap)?;
        }
        None => emitter.write(&0u8)?,
    }

    debug!(
        "Encoded mesh with {} groups into {} bytes",
        file.mesh_groups.len(),
        emitter.offset()
    );
    Ok(emitter.into_bytes())
}

fn bone_trailer_presence(file: &MeshFile) -> Result<(), Violation> {
    let state = |present: bool| if present { "present" } else { "absent" };
    if file.bone_trailer.is_some() != !file.bones.is_empty() {
        return Err(Violation::new(
            "bone trailer",
            state(!file.bones.is_empty()),
            state(file.bone_trailer.is_some()),
        ));
    }
    Ok(())
}

/// Checks the model without encoding it.
pub fn validate(file: &MeshFile) -> Result<(), Violation> {
    file.byte_ranges
        .validate(file.vertex_count, file.triangle_count)?;
    let triangle_vertex_count = u64::from(file.triangle_count) * 3;
    let triangle_vertex_count = u32::try_from(triangle_vertex_count)
        .map_err(|_| Violation::new("triangle count", "at most u32::MAX / 3", file.triangle_count))?;
    validate_mesh_groups(
        &file.mesh_groups,
        file.vertex_count,
        triangle_vertex_count,
        file.materials.len(),
    )?;
    let skeleton = file.skeleton();
    skeleton.validate()?;
    skeleton.validate_collision(true)?;
    file.attachments
        .iter()
        .try_for_each(|attachment| attachment.validate(file.bones.len()))?;
    bone_trailer_presence(file)?;
    if let Some(trailer) = &file.bone_trailer {
        trailer.validate()?;
    }
    match &file.heightmap {
        Some(heightmap) => heightmap.validate(),
        None => Ok(()),
    }
}
