//! 16-bit packed unit vectors used for the per-vertex tangent frame.

use binrw::{binrw, BinRead, BinWrite};
use glam::Vec3;
use modular_bitfield::prelude::*;

use crate::{error::FormatError, validate::UNIT_TOLERANCE};

const XY_LEVELS: f32 = 63.0;
const Z_LEVELS: f32 = 3.0;

/// A direction packed as 6-bit `x` and `y` magnitudes with sign bits and a
/// 2-bit signed `z`, lowest bits first.
///
/// `z` has four levels, `-1`, `-1/3`, `1/3` and `1`. Decoded vectors are
/// not renormalized.
#[bitfield(bits = 16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[br(map = Self::from_bytes)]
#[bw(map = |packed: &Self| packed.into_bytes())]
pub struct PackedVector {
    pub x: B6,
    pub x_negative: bool,
    pub y: B6,
    pub y_negative: bool,
    pub z: B2,
}

impl PackedVector {
    pub fn decode(self) -> Vec3 {
        let signed = |magnitude: u8, negative: bool| {
            let value = f32::from(magnitude) / XY_LEVELS;
            if negative {
                -value
            } else {
                value
            }
        };
        Vec3::new(
            signed(self.x(), self.x_negative()),
            signed(self.y(), self.y_negative()),
            f32::from(self.z()) / Z_LEVELS * 2.0 - 1.0,
        )
    }

    /// Packs a vector whose components lie in `[-1, 1]`.
    ///
    /// Components overshooting by less than the unit tolerance are clamped.
    pub fn encode(vector: Vec3) -> Result<Self, FormatError> {
        let clamp = |axis: &str, value: f32| {
            if !value.is_finite() || value.abs() > 1.0 + UNIT_TOLERANCE {
                Err(FormatError::out_of_range(format!("packed vector {}", axis), value))
            } else {
                Ok(value.clamp(-1.0, 1.0))
            }
        };
        let x = clamp("x", vector.x)?;
        let y = clamp("y", vector.y)?;
        let z = clamp("z", vector.z)?;

        let magnitude = |value: f32| (value.abs() * XY_LEVELS).round() as u8;
        let (x_raw, y_raw) = (magnitude(x), magnitude(y));
        let z_raw = ((z + 1.0) / 2.0 * Z_LEVELS).round() as u8;
        Ok(Self::new()
            .with_x(x_raw)
            .with_x_negative(x < 0.0 && x_raw != 0)
            .with_y(y_raw)
            .with_y_negative(y < 0.0 && y_raw != 0)
            .with_z(z_raw.min(3)))
    }
}

/// Packed bitangent, normal and tangent of one vertex, in file order.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TangentFrame {
    pub bitangent: PackedVector,
    pub normal: PackedVector,
    pub tangent: PackedVector,
}

impl TangentFrame {
    pub fn encode(bitangent: Vec3, normal: Vec3, tangent: Vec3) -> Result<Self, FormatError> {
        Ok(Self {
            bitangent: PackedVector::encode(bitangent)?,
            normal: PackedVector::encode(normal)?,
            tangent: PackedVector::encode(tangent)?,
        })
    }

    pub fn bitangent(&self) -> Vec3 {
        self.bitangent.decode()
    }

    pub fn normal(&self) -> Vec3 {
        self.normal.decode()
    }

    pub fn tangent(&self) -> Vec3 {
        self.tangent.decode()
    }
}
