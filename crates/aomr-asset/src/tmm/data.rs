//! The `.tmm.data` geometry buffer.

use binrw::binrw;
use glam::{Vec2, Vec3};
use half::f16;
use log::debug;

use crate::{
    constants::{HEIGHT_SIZE, TRIANGLE_SIZE, VERTEX_SIZE, WEIGHTS_SIZE},
    cursor::{Emitter, Walker},
    error::{FormatError, Violation},
    validate::expect_eq,
    vector::TangentFrame,
    DecodeParams,
};

use super::{ByteRange, MeshFile};

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    #[br(map = |bits: [u16; 3]| bits.map(f16::from_bits))]
    #[bw(map = |position: &[f16; 3]| position.map(f16::to_bits))]
    pub position: [f16; 3],
    #[br(map = |bits: [u16; 2]| bits.map(f16::from_bits))]
    #[bw(map = |uv: &[f16; 2]| uv.map(f16::to_bits))]
    pub uv: [f16; 2],
    pub frame: TangentFrame,
}

impl Vertex {
    pub fn new(position: Vec3, uv: Vec2, frame: TangentFrame) -> Self {
        Self {
            position: position.to_array().map(f16::from_f32),
            uv: uv.to_array().map(f16::from_f32),
            frame,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position.map(f16::to_f32))
    }

    pub fn uv(&self) -> Vec2 {
        Vec2::from_array(self.uv.map(f16::to_f32))
    }
}

/// Vertex indices local to the triangle's mesh group.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    pub indices: [u16; 3],
}

/// Up to four bone influences, weights in 255ths.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VertexWeights {
    pub weights: [u8; 4],
    pub bones: [u8; 4],
}

impl VertexWeights {
    /// Keeps the four strongest `(bone, weight)` influences and scales them
    /// to sum to 255. Unused slots are zero and come first.
    pub fn from_influences(influences: &[(u8, f32)]) -> Self {
        let mut strongest: Vec<(u8, f32)> = influences
            .iter()
            .copied()
            .filter(|(_, weight)| weight.is_finite() && *weight > 0.0)
            .collect();
        strongest.sort_by(|a, b| b.1.total_cmp(&a.1));
        strongest.truncate(4);

        let total: f32 = strongest.iter().map(|(_, weight)| weight).sum();
        if strongest.is_empty() || total <= 0.0 {
            return Self::default();
        }
        let mut scaled: Vec<(u8, u8)> = strongest
            .iter()
            .map(|(bone, weight)| (*bone, (weight / total * 255.0).round().min(255.0) as u8))
            .collect();
        // Rounding drift goes to the strongest influence.
        let sum: i32 = scaled.iter().map(|(_, weight)| i32::from(*weight)).sum();
        let fixed = (i32::from(scaled[0].1) + 255 - sum).clamp(0, 255);
        scaled[0].1 = fixed as u8;

        let mut result = Self::default();
        let offset = 4 - scaled.len();
        for (slot, (bone, weight)) in scaled.into_iter().enumerate() {
            result.bones[offset + slot] = bone;
            result.weights[offset + slot] = weight;
        }
        result
    }

    /// Non-zero influences as `(bone, weight)` with weights in `[0, 1]`.
    pub fn influences(&self) -> impl Iterator<Item = (u8, f32)> + '_ {
        self.bones
            .iter()
            .zip(self.weights.iter())
            .filter(|(_, weight)| **weight != 0)
            .map(|(bone, weight)| (*bone, f32::from(*weight) / 255.0))
    }

    pub fn total(&self) -> u32 {
        self.weights.iter().map(|weight| u32::from(*weight)).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub triangles: Vec<Triangle>,
    pub weights: Option<Vec<VertexWeights>>,
    pub heights: Option<Vec<f16>>,
}

impl MeshData {
    /// Triangles with indices into the flat vertex array.
    pub fn triangle_indices(&self, file: &MeshFile) -> Vec<[u32; 3]> {
        file.mesh_groups
            .iter()
            .flat_map(|group| {
                let base = group.vertex_start;
                self.triangles
                    .get(group.triangles())
                    .unwrap_or_default()
                    .iter()
                    .map(move |triangle| triangle.indices.map(|index| base + u32::from(index)))
            })
            .collect()
    }

    fn validate_triangles(&self, file: &MeshFile) -> Result<(), Violation> {
        for (group_index, group) in file.mesh_groups.iter().enumerate() {
            let triangles = self.triangles.get(group.triangles()).unwrap_or_default();
            for (offset, triangle) in triangles.iter().enumerate() {
                if let Some(index) = triangle
                    .indices
                    .iter()
                    .find(|index| u32::from(**index) >= group.vertex_count)
                {
                    return Err(Violation::new(
                        format!(
                            "index of triangle {} in mesh group {}",
                            group.triangle_start() as usize + offset,
                            group_index
                        ),
                        format!("below {}", group.vertex_count),
                        index,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Checks the buffer against the counts and blocks declared by `file`.
    pub fn validate(&self, file: &MeshFile) -> Result<(), Violation> {
        let ranges = &file.byte_ranges;
        let vertex_count = file.vertex_count as usize;
        expect_eq("vertex count", vertex_count, self.vertices.len())?;
        expect_eq("triangle count", file.triangle_count as usize, self.triangles.len())?;
        check_optional("weights", ranges.has_weights(), vertex_count, self.weights.as_ref())?;
        check_optional("heights", ranges.has_heights(), vertex_count, self.heights.as_ref())?;
        self.validate_triangles(file)
    }
}

fn check_optional<T>(
    block: &str,
    declared: bool,
    vertex_count: usize,
    values: Option<&Vec<T>>,
) -> Result<(), Violation> {
    match (declared, values) {
        (true, Some(values)) => expect_eq(&format!("{} count", block), vertex_count, values.len()),
        (false, None) => Ok(()),
        (declared, _) => Err(Violation::new(
            block,
            if declared { "present" } else { "absent" },
            if declared { "absent" } else { "present" },
        )),
    }
}

pub fn decode_data(bytes: &[u8], file: &MeshFile) -> Result<MeshData, FormatError> {
    decode_data_with(bytes, file, &DecodeParams::default())
}

pub fn decode_data_with(
    bytes: &[u8],
    file: &MeshFile,
    params: &DecodeParams,
) -> Result<MeshData, FormatError> {
    let ranges = file.byte_ranges;
    ranges
        .validate(file.vertex_count, file.triangle_count)
        .map_err(|violation| violation.at(0))?;
    if ranges.data_len() > bytes.len() as u64 {
        return Err(FormatError::UnexpectedEndOfBuffer {
            offset: bytes.len() as u64,
        });
    }

    let mut walker = Walker::new(bytes, params);
    walker.seek(u64::from(ranges.vertices.start))?;
    let vertices: Vec<Vertex> = walker.read_table("vertex", file.vertex_count, VERTEX_SIZE)?;

    walker.seek(u64::from(ranges.triangles.start))?;
    let triangles: Vec<Triangle> =
        walker.read_table("triangle", file.triangle_count, TRIANGLE_SIZE)?;

    let weights = read_optional(&mut walker, ranges.weights, file.vertex_count, "weights", WEIGHTS_SIZE)?;
    let heights = read_optional::<u16>(&mut walker, ranges.heights, file.vertex_count, "height", HEIGHT_SIZE)?
        .map(|bits| bits.into_iter().map(f16::from_bits).collect());
    walker.finish()?;

    let data = MeshData {
        vertices,
        triangles,
        weights,
        heights,
    };
    data.validate_triangles(file)
        .map_err(|violation| violation.at(u64::from(ranges.triangles.start)))?;
    debug!(
        "Geometry: {} vertices, {} triangles, weights {}, heights {}",
        data.vertices.len(),
        data.triangles.len(),
        data.weights.is_some(),
        data.heights.is_some()
    );
    Ok(data)
}

fn read_optional<T>(
    walker: &mut Walker<'_>,
    range: ByteRange,
    count: u32,
    field: &str,
    size: u64,
) -> Result<Option<Vec<T>>, FormatError>
where
    T: for<'b> binrw::BinRead<Args<'b> = ()>,
{
    if range.is_empty() {
        return Ok(None);
    }
    walker.seek(u64::from(range.start))?;
    walker.read_table(field, count, size).map(Some)
}

pub fn encode_data(data: &MeshData, file: &MeshFile) -> Result<Vec<u8>, FormatError> {
    let ranges = file.byte_ranges;
    let mut emitter = Emitter::new();
    emitter.check(ranges.validate(file.vertex_count, file.triangle_count))?;
    emitter.check(data.validate(file))?;

    emitter.write_all(&data.vertices)?;
    emitter.check(expect_eq("triangles.start", u64::from(ranges.triangles.start), emitter.offset()))?;
    emitter.write_all(&data.triangles)?;
    if let Some(weights) = &data.weights {
        emitter.check(expect_eq("weights.start", u64::from(ranges.weights.start), emitter.offset()))?;
        emitter.write_all(weights)?;
    }
    if let Some(heights) = &data.heights {
        emitter.check(expect_eq("heights.start", u64::from(ranges.heights.start), emitter.offset()))?;
        for height in heights {
            emitter.write(&height.to_bits())?;
        }
    }
    Ok(emitter.into_bytes())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tmm::MeshGroup;

    fn file(has_weights: bool, has_heights: bool) -> MeshFile {
        let mut file = MeshFile::new();
        file.vertex_count = 3;
        file.triangle_count = 1;
        file.byte_ranges = crate::tmm::ByteRangeTable::for_layout(3, 1, has_weights, has_heights).unwrap();
        file.mesh_groups.push(MeshGroup {
            vertex_start: 0,
            triangle_vertex_start: 0,
            vertex_count: 3,
            triangle_vertex_count: 3,
            material: 0,
            shader_technique: 0,
        });
        file.materials.push("stone".to_string());
        file
    }

    fn data() -> MeshData {
        let frame = TangentFrame::encode(Vec3::X, Vec3::Z, Vec3::Y).unwrap();
        MeshData {
            vertices: vec![
                Vertex::new(Vec3::ZERO, Vec2::ZERO, frame),
                Vertex::new(Vec3::X, Vec2::X, frame),
                Vertex::new(Vec3::new(0.0, 1.5, 0.0), Vec2::Y, frame),
            ],
            triangles: vec![Triangle { indices: [0, 2, 1] }],
            weights: None,
            heights: None,
        }
    }

    #[test]
    fn test_round_trip() {
        let file = file(false, false);
        let data = data();
        let bytes = encode_data(&data, &file).unwrap();
        assert_eq!(bytes.len(), 54);
        let decoded = decode_data(&bytes, &file).unwrap();
        assert_eq!(decoded, data);
        assert_eq!(decoded.vertices[2].position(), Vec3::new(0.0, 1.5, 0.0));
        assert_eq!(decoded.triangle_indices(&file), vec![[0, 2, 1]]);
    }

    #[test]
    fn test_optional_blocks() {
        let file = file(true, true);
        let mut data = data();
        data.weights = Some(vec![VertexWeights::from_influences(&[(1, 1.0)]); 3]);
        data.heights = Some(vec![f16::from_f32(0.5); 3]);
        let bytes = encode_data(&data, &file).unwrap();
        assert_eq!(bytes.len() as u64, file.byte_ranges.data_len());
        assert_eq!(decode_data(&bytes, &file).unwrap(), data);

        data.heights = None;
        assert!(encode_data(&data, &file).is_err());
    }

    #[test]
    fn test_rejects_out_of_group_index() {
        let file = file(false, false);
        let mut data = data();
        data.triangles[0].indices[1] = 3;
        assert!(encode_data(&data, &file).is_err());

        let mut bytes = encode_data(&self::data(), &file).unwrap();
        bytes[48 + 2] = 3;
        assert!(matches!(
            decode_data(&bytes, &file),
            Err(FormatError::FormatInvariantViolation { .. })
        ));
    }

    #[test]
    fn test_short_buffer() {
        let file = file(false, false);
        let bytes = encode_data(&data(), &file).unwrap();
        assert!(matches!(
            decode_data(&bytes[..50], &file),
            Err(FormatError::UnexpectedEndOfBuffer { .. })
        ));
    }

    #[test]
    fn test_weights_from_influences() {
        let weights = VertexWeights::from_influences(&[(3, 0.1), (7, 0.6), (2, 0.3)]);
        assert_eq!(weights.bones, [0, 7, 2, 3]);
        assert_eq!(weights.weights[0], 0);
        assert_eq!(weights.total(), 255);

        let weights = VertexWeights::from_influences(&[
            (1, 1.0),
            (2, 1.0),
            (3, 1.0),
            (4, 0.5),
            (5, 0.1),
        ]);
        assert!(!weights.bones.contains(&5));
        assert_eq!(weights.total(), 255);
        assert_eq!(weights.influences().count(), 4);

        assert_eq!(VertexWeights::from_influences(&[]), VertexWeights::default());
    }
}
