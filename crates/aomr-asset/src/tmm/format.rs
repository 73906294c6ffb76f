use binrw::binrw;
use glam::{Mat4, Vec3, Vec4};

use crate::{
    constants::{HEIGHT_SIZE, TRAILER_MARKER_VS, TRAILER_MARKER_VX, TRIANGLE_SIZE, VERTEX_SIZE, WEIGHTS_SIZE},
    cursor::{read_records, read_utf16, write_utf16, OpaqueBlock},
    error::Violation,
    skeleton::BoneIndex,
    validate::{expect_eq, expect_index, expect_one_of},
};

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    #[br(map = Vec3::from_array)]
    #[bw(map = |min: &Vec3| min.to_array())]
    pub min: Vec3,
    #[br(map = Vec3::from_array)]
    #[bw(map = |max: &Vec3| max.to_array())]
    pub max: Vec3,
}

/// Affine transform stored as three rows of four floats, translation in
/// the last column.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3x4 {
    pub rows: [[f32; 4]; 3],
}

impl Transform3x4 {
    pub const IDENTITY: Transform3x4 = Transform3x4 {
        rows: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
        ],
    };

    pub fn to_mat4(&self) -> Mat4 {
        let [r0, r1, r2] = self.rows;
        Mat4::from_cols(
            Vec4::new(r0[0], r1[0], r2[0], 0.0),
            Vec4::new(r0[1], r1[1], r2[1], 0.0),
            Vec4::new(r0[2], r1[2], r2[2], 0.0),
            Vec4::new(r0[3], r1[3], r2[3], 1.0),
        )
    }

    /// Drops the bottom row of an affine matrix.
    pub fn from_mat4(matrix: Mat4) -> Self {
        let row = |index: usize| matrix.row(index).to_array();
        Self {
            rows: [row(0), row(1), row(2)],
        }
    }

    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.rows[0][3], self.rows[1][3], self.rows[2][3])
    }
}

impl Default for Transform3x4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// One block of the geometry buffer.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRange {
    pub start: u32,
    pub length: u32,
}

impl ByteRange {
    pub fn new(start: u32, length: u32) -> Self {
        Self { start, length }
    }

    pub fn end(&self) -> u64 {
        u64::from(self.start) + u64::from(self.length)
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }
}

/// Location of every block in the geometry buffer.
///
/// The three reserved blocks have never been seen in use; their start must
/// be zero and their length is kept as stored.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRangeTable {
    pub vertices: ByteRange,
    pub triangles: ByteRange,
    pub weights: ByteRange,
    #[br(assert(reserved_a.start == 0, Violation::new("reserved block A start", 0, reserved_a.start)))]
    pub reserved_a: ByteRange,
    #[br(assert(reserved_b.start == 0, Violation::new("reserved block B start", 0, reserved_b.start)))]
    pub reserved_b: ByteRange,
    pub heights: ByteRange,
    #[br(assert(reserved_c.start == 0, Violation::new("reserved block C start", 0, reserved_c.start)))]
    pub reserved_c: ByteRange,
}

impl ByteRangeTable {
    /// Lays out the blocks back to back, the way exporters write them.
    pub fn for_layout(
        vertex_count: u32,
        triangle_count: u32,
        has_weights: bool,
        has_heights: bool,
    ) -> Option<Self> {
        let vertices = u32::try_from(u64::from(vertex_count) * VERTEX_SIZE).ok()?;
        let triangles = u32::try_from(u64::from(triangle_count) * TRIANGLE_SIZE).ok()?;
        let weights = if has_weights {
            u32::try_from(u64::from(vertex_count) * WEIGHTS_SIZE).ok()?
        } else {
            0
        };
        let heights = if has_heights {
            u32::try_from(u64::from(vertex_count) * HEIGHT_SIZE).ok()?
        } else {
            0
        };
        let weights_start = vertices.checked_add(triangles)?;
        let heights_start = weights_start.checked_add(weights)?;
        heights_start.checked_add(heights)?;
        Some(Self {
            vertices: ByteRange::new(0, vertices),
            triangles: ByteRange::new(vertices, triangles),
            weights: if has_weights {
                ByteRange::new(weights_start, weights)
            } else {
                ByteRange::default()
            },
            heights: if has_heights {
                ByteRange::new(heights_start, heights)
            } else {
                ByteRange::default()
            },
            ..Default::default()
        })
    }

    pub fn has_weights(&self) -> bool {
        !self.weights.is_empty()
    }

    pub fn has_heights(&self) -> bool {
        !self.heights.is_empty()
    }

    /// End of the last block in use.
    pub fn data_len(&self) -> u64 {
        [self.vertices, self.triangles, self.weights, self.heights]
            .iter()
            .map(ByteRange::end)
            .max()
            .unwrap_or(0)
    }

    /// Checks block positions and lengths against the element counts.
    pub fn validate(&self, vertex_count: u32, triangle_count: u32) -> Result<(), Violation> {
        let vertex_count = u64::from(vertex_count);
        let length = |range: ByteRange| u64::from(range.length);
        let start = |range: ByteRange| u64::from(range.start);

        expect_eq("vertices.start", 0, start(self.vertices))?;
        expect_eq("vertices.length", vertex_count * VERTEX_SIZE, length(self.vertices))?;
        if start(self.triangles) != length(self.vertices) {
            return Err(Violation::new(
                "triangles.start",
                format!("vertices.length ({})", self.vertices.length),
                self.triangles.start,
            ));
        }
        expect_eq(
            "triangles.length",
            u64::from(triangle_count) * TRIANGLE_SIZE,
            length(self.triangles),
        )?;

        let weights_start = length(self.vertices) + length(self.triangles);
        if self.has_weights() {
            expect_eq("weights.start", weights_start, start(self.weights))?;
            expect_eq("weights.length", vertex_count * WEIGHTS_SIZE, length(self.weights))?;
        } else {
            expect_eq("weights.start", 0, start(self.weights))?;
        }

        if self.has_heights() {
            expect_eq(
                "heights.start",
                weights_start + length(self.weights),
                start(self.heights),
            )?;
            expect_eq("heights.length", vertex_count * HEIGHT_SIZE, length(self.heights))?;
        } else {
            expect_eq("heights.start", 0, start(self.heights))?;
        }
        Ok(())
    }
}

/// Counts and globals following the import metadata, up to the transform.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MeshSummary {
    pub bounding_box: BoundingBox,
    pub animated_bounding_box: BoundingBox,
    pub scale: f32,
    pub mesh_group_count: u32,
    pub material_count: u32,
    pub shader_technique_count: u32,
    pub bone_count: u32,
    #[br(temp, assert(reserved_count == 0, Violation::new("reserved count", 0, reserved_count)))]
    #[bw(calc = 0u32)]
    reserved_count: u32,
    pub attachment_count: u32,
    pub vertex_count: u32,
    #[br(assert(
        triangle_vertex_count % 3 == 0,
        Violation::new("triangle vertex count", "a multiple of 3", triangle_vertex_count)
    ))]
    pub triangle_vertex_count: u32,
    pub byte_ranges: ByteRangeTable,
    #[br(temp, assert(flags == [0, 1], Violation::new("summary flags", "[0, 1]", format!("{:?}", flags))))]
    #[bw(calc = [0u8, 1])]
    flags: [u8; 2],
    pub transform: Transform3x4,
}

/// A named attachment point such as a weapon or a rider seat.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq)]
pub struct MeshAttachment {
    #[br(temp, assert(leading == 0, Violation::new("attachment leading word", 0, leading)))]
    #[bw(calc = 0u32)]
    leading: u32,
    pub parent: BoneIndex,
    #[br(parse_with = read_utf16)]
    #[bw(write_with = write_utf16)]
    pub name: String,
    pub transform: Transform3x4,
    pub secondary_transform: Transform3x4,
    #[br(assert(flags == 0 || flags == 2, Violation::new("attachment flags", "0 or 2", flags)))]
    pub flags: u32,
    #[br(temp, assert(reserved == 0, Violation::new("attachment reserved word", 0, reserved)))]
    #[bw(calc = 0u32)]
    reserved: u32,
    #[br(parse_with = read_utf16)]
    #[bw(write_with = write_utf16)]
    pub secondary_name: String,
    #[br(temp, assert(
        sentinel == [-1, 0, 0, 0],
        Violation::new("attachment sentinel", "[-1, 0, 0, 0]", format!("{:?}", sentinel))
    ))]
    #[bw(calc = [-1i32, 0, 0, 0])]
    sentinel: [i32; 4],
}

pub(crate) const MIN_ATTACHMENT_SIZE: u64 = 4 + 4 + 4 + 48 + 48 + 4 + 4 + 4 + 16;

impl MeshAttachment {
    pub fn new(name: impl Into<String>, parent: BoneIndex) -> Self {
        Self {
            parent,
            name: name.into(),
            transform: Transform3x4::IDENTITY,
            secondary_transform: Transform3x4::IDENTITY,
            flags: 0,
            secondary_name: String::new(),
        }
    }

    pub fn validate(&self, bone_count: usize) -> Result<(), Violation> {
        expect_one_of(&format!("flags of attachment {:?}", self.name), &[0, 2], self.flags)?;
        self.parent
            .check(&format!("parent of attachment {:?}", self.name), bone_count)
    }
}

/// A run of vertices and triangles drawn with one material.
///
/// Triangle fields count triangle vertices, three per triangle, as stored.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshGroup {
    pub vertex_start: u32,
    pub triangle_vertex_start: u32,
    pub vertex_count: u32,
    pub triangle_vertex_count: u32,
    pub material: u32,
    pub shader_technique: u32,
}

pub(crate) const MESH_GROUP_SIZE: u64 = 24;

impl MeshGroup {
    pub fn triangle_start(&self) -> u32 {
        self.triangle_vertex_start / 3
    }

    pub fn triangle_count(&self) -> u32 {
        self.triangle_vertex_count / 3
    }

    pub fn vertices(&self) -> std::ops::Range<usize> {
        let start = self.vertex_start as usize;
        start..start + self.vertex_count as usize
    }

    pub fn triangles(&self) -> std::ops::Range<usize> {
        let start = self.triangle_start() as usize;
        start..start + self.triangle_count() as usize
    }
}

/// Checks that groups cover vertices and triangles in order without gaps,
/// and that their material indices exist.
///
/// The shader technique index is not checked: exporters write `1` with a
/// single technique.
pub fn validate_mesh_groups(
    groups: &[MeshGroup],
    vertex_count: u32,
    triangle_vertex_count: u32,
    material_count: usize,
) -> Result<(), Violation> {
    let mut vertex_end = 0u64;
    let mut triangle_end = 0u64;
    for (index, group) in groups.iter().enumerate() {
        let field = |name: &str| format!("{} of mesh group {}", name, index);
        expect_eq(&field("vertex start"), vertex_end, u64::from(group.vertex_start))?;
        expect_eq(
            &field("triangle start"),
            triangle_end,
            u64::from(group.triangle_vertex_start),
        )?;
        if group.triangle_vertex_count % 3 != 0 {
            return Err(Violation::new(
                field("triangle vertex count"),
                "a multiple of 3",
                group.triangle_vertex_count,
            ));
        }
        expect_index(&field("material"), group.material, material_count)?;
        vertex_end += u64::from(group.vertex_count);
        triangle_end += u64::from(group.triangle_vertex_count);
    }
    if !groups.is_empty() || vertex_count != 0 || triangle_vertex_count != 0 {
        expect_eq("vertices covered by mesh groups", u64::from(vertex_count), vertex_end)?;
        expect_eq(
            "triangle vertices covered by mesh groups",
            u64::from(triangle_vertex_count),
            triangle_end,
        )?;
    }
    Ok(())
}

/// Opaque record of the table following the bones.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThingEntry {
    pub id: i32,
    pub values: [f32; 2],
}

pub(crate) const THING_SIZE: u64 = 12;

/// Block present after the bones of skinned meshes.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BoneTrailer {
    pub flag: u8,
    pub reserved: [u8; 3],
    #[br(if(flag != 0))]
    pub payload: Option<OpaqueBlock>,
}

impl BoneTrailer {
    pub fn validate(&self) -> Result<(), Violation> {
        if self.payload.is_some() != (self.flag != 0) {
            return Err(Violation::new(
                "bone trailer payload",
                if self.flag != 0 { "present" } else { "absent" },
                if self.payload.is_some() { "present" } else { "absent" },
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailerMarker {
    #[default]
    Vx,
    Vs,
}

impl TrailerMarker {
    fn from_raw(raw: u16) -> Result<Self, Violation> {
        match raw {
            TRAILER_MARKER_VX => Ok(TrailerMarker::Vx),
            TRAILER_MARKER_VS => Ok(TrailerMarker::Vs),
            other => Err(Violation::new(
                "trailer marker",
                format!("{} or {}", TRAILER_MARKER_VX, TRAILER_MARKER_VS),
                other,
            )),
        }
    }

    pub fn raw(self) -> u16 {
        match self {
            TrailerMarker::Vx => TRAILER_MARKER_VX,
            TrailerMarker::Vs => TRAILER_MARKER_VS,
        }
    }
}

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MarkedTrailer {
    #[br(temp, assert(lead == 0, Violation::new("trailer lead byte", 0, lead)))]
    #[bw(calc = 0u8)]
    lead: u8,
    #[br(try_map = TrailerMarker::from_raw)]
    #[bw(map = |marker: &TrailerMarker| marker.raw())]
    pub marker: TrailerMarker,
    #[br(temp, assert(tail == 1, Violation::new("trailer tail word", 1, tail)))]
    #[bw(calc = 1u32)]
    tail: u32,
}

/// Square grid of packed samples carried by some buildings.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq)]
pub struct Heightmap {
    pub bounding_box: BoundingBox,
    pub width: u32,
    pub scale: f32,
    #[br(temp, assert(
        u64::from(byte_length) == u64::from(width) * u64::from(width) * 4,
        Violation::new("heightmap byte length", u64::from(width) * u64::from(width) * 4, byte_length)
    ))]
    #[bw(try_calc = u32::try_from(pixels.len() * 4))]
    byte_length: u32,
    #[br(parse_with = read_records, args(u64::from(width) * u64::from(width), 4))]
    pub pixels: Vec<u32>,
}

impl Heightmap {
    pub fn validate(&self) -> Result<(), Violation> {
        let expected = u64::from(self.width) * u64::from(self.width);
        expect_eq("heightmap pixel count", expected, self.pixels.len() as u64)
    }

    /// Pixel at column `x` of row `y`.
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.width {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}
