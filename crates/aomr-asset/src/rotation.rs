//! Smallest-three packed rotations.
//!
//! A rotation is stored in one little-endian `u64`. The largest component is
//! dropped and rebuilt from the unit norm, the other three are stored as
//! 19-bit magnitudes with a separate sign bit:
//!
//! | bits  | field                                    |
//! |-------|------------------------------------------|
//! | 0-18  | magnitude of the first stored component  |
//! | 19    | sign of the first component, 1 = positive|
//! | 20-38 | second magnitude                         |
//! | 39    | second sign                              |
//! | 40-58 | third magnitude                          |
//! | 59    | third sign                               |
//! | 60-61 | omitted component, 0 = x ... 3 = w       |
//! | 62-63 | padding, always zero                     |
//!
//! Stored components fill the slots of `(w, z, y, x)` that are not omitted,
//! in that order.

use std::{
    f32::consts::{FRAC_1_SQRT_2, SQRT_2},
    io::{Read, Seek, Write},
};

use binrw::{BinRead, BinResult, BinWrite, Endian};
use glam::Quat;
use modular_bitfield::prelude::*;

use crate::{
    cursor::extract_bits,
    error::{FormatError, Violation},
    validate::UNIT_TOLERANCE,
};

const MAGNITUDE_SCALE: f32 = 524288.0;
const MAGNITUDE_MAX: u32 = (1 << 19) - 1;

/// How stored signs map to the reconstructed quaternion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationSignPolicy {
    /// Stored signs are used as they are.
    Verbatim,
    /// The game exporter's convention: unless `w` is omitted, the second and
    /// third stored components are negated, and static rotations are stored
    /// as `(x, y, z, -w)`.
    #[default]
    Mirrored,
}

impl RotationSignPolicy {
    fn flips_stored(self, omitted: usize) -> bool {
        self == RotationSignPolicy::Mirrored && omitted != 3
    }
}

#[bitfield(bits = 64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedRotation {
    pub a: B19,
    pub a_positive: bool,
    pub b: B19,
    pub b_positive: bool,
    pub c: B19,
    pub c_positive: bool,
    pub omitted: B2,
    #[skip]
    __: B2,
}

impl PackedRotation {
    pub fn from_raw(raw: u64) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    pub fn raw(self) -> u64 {
        u64::from_le_bytes(self.into_bytes())
    }

    fn stored(self) -> [f32; 3] {
        let signed = |magnitude: u32, positive: bool| {
            let value = magnitude as f32 / MAGNITUDE_SCALE * FRAC_1_SQRT_2;
            if positive {
                value
            } else {
                -value
            }
        };
        [
            signed(self.a(), self.a_positive()),
            signed(self.b(), self.b_positive()),
            signed(self.c(), self.c_positive()),
        ]
    }

    /// Rebuilds the quaternion. The omitted component is never negative.
    pub fn decode(self, policy: RotationSignPolicy) -> Quat {
        let omitted = self.omitted() as usize;
        let mut stored = self.stored();
        if policy.flips_stored(omitted) {
            stored[1] = -stored[1];
            stored[2] = -stored[2];
        }
        let sum: f32 = stored.iter().map(|c| c * c).sum();

        // Slots in storage order (w, z, y, x); component k sits at 3 - k.
        let slot = 3 - omitted;
        let mut slots = [0.0f32; 4];
        let mut values = stored.into_iter();
        for (index, value) in slots.iter_mut().enumerate() {
            if index == slot {
                *value = (1.0 - sum).max(0.0).sqrt();
            } else if let Some(next) = values.next() {
                *value = next;
            }
        }
        let [w, z, y, x] = slots;
        Quat::from_xyzw(x, y, z, w)
    }

    /// Packs a unit quaternion, dropping its largest component.
    pub fn encode(rotation: Quat, policy: RotationSignPolicy) -> Result<Self, FormatError> {
        if !rotation.is_finite() {
            return Err(FormatError::out_of_range("rotation", rotation));
        }
        let norm = rotation.length();
        if (norm - 1.0).abs() > UNIT_TOLERANCE {
            return Err(FormatError::out_of_range(
                "rotation norm",
                format!("{} ({})", norm, rotation),
            ));
        }
        let mut components = rotation.normalize().to_array();
        let mut omitted = 0;
        for (index, value) in components.iter().enumerate() {
            if value.abs() > components[omitted].abs() {
                omitted = index;
            }
        }
        if components[omitted] < 0.0 {
            components = components.map(|c| -c);
        }

        let [x, y, z, w] = components;
        let slot = 3 - omitted;
        let mut stored = [w, z, y, x]
            .into_iter()
            .enumerate()
            .filter(|(index, _)| *index != slot)
            .map(|(_, value)| value);
        let mut stored = [
            stored.next().unwrap_or_default(),
            stored.next().unwrap_or_default(),
            stored.next().unwrap_or_default(),
        ];
        if policy.flips_stored(omitted) {
            stored[1] = -stored[1];
            stored[2] = -stored[2];
        }

        let quantize = |value: f32| {
            let magnitude = (value.abs() * SQRT_2 * MAGNITUDE_SCALE).round() as u32;
            magnitude.min(MAGNITUDE_MAX)
        };
        Ok(Self::new()
            .with_a(quantize(stored[0]))
            .with_a_positive(stored[0] >= 0.0)
            .with_b(quantize(stored[1]))
            .with_b_positive(stored[1] >= 0.0)
            .with_c(quantize(stored[2]))
            .with_c_positive(stored[2] >= 0.0)
            .with_omitted(omitted as u8))
    }
}

impl BinRead for PackedRotation {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let raw = u64::read_options(reader, endian, ())?;
        let padding = extract_bits(raw, 62, 2);
        if padding != 0 {
            return Err(Violation::new("rotation padding bits", 0, padding).into_binrw(pos));
        }
        Ok(Self::from_raw(raw))
    }
}

impl BinWrite for PackedRotation {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _: Self::Args<'_>,
    ) -> BinResult<()> {
        self.raw().write_options(writer, endian, ())
    }
}

/// Static rotation as stored in a track: four raw floats.
pub fn decode_static(stored: [f32; 4], policy: RotationSignPolicy) -> Quat {
    let [x, y, z, w] = stored;
    match policy {
        RotationSignPolicy::Verbatim => Quat::from_xyzw(x, y, z, w),
        RotationSignPolicy::Mirrored => Quat::from_xyzw(x, y, z, -w),
    }
}

pub fn encode_static(rotation: Quat, policy: RotationSignPolicy) -> [f32; 4] {
    let [x, y, z, w] = rotation.to_array();
    match policy {
        RotationSignPolicy::Verbatim => [x, y, z, w],
        RotationSignPolicy::Mirrored => [x, y, z, -w],
    }
}

/// Negates rotations whose dot product with the previous frame is negative,
/// so consecutive frames stay on one hemisphere.
pub fn make_continuous(rotations: &mut [Quat]) {
    for index in 1..rotations.len() {
        if rotations[index - 1].dot(rotations[index]) < 0.0 {
            rotations[index] = -rotations[index];
        }
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use binrw::BinReaderExt;
    use proptest::prelude::*;

    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() <= 1e-4
    }

    #[test]
    fn test_identity() {
        for policy in [RotationSignPolicy::Verbatim, RotationSignPolicy::Mirrored] {
            let packed = PackedRotation::encode(Quat::IDENTITY, policy).unwrap();
            assert_eq!(packed.omitted(), 3);
            assert_eq!(packed.a(), 0);
            let decoded = packed.decode(policy);
            assert!(decoded.abs_diff_eq(Quat::IDENTITY, 1e-6));
        }
    }

    #[test]
    fn test_bit_layout() {
        // a = 1, positive; b = 2, negative; c = 3, positive; omitted z.
        let raw = 1u64 | 1 << 19 | 2 << 20 | 3 << 40 | 1 << 59 | 2 << 60;
        let packed = PackedRotation::from_raw(raw);
        assert_eq!(packed.a(), 1);
        assert!(packed.a_positive());
        assert_eq!(packed.b(), 2);
        assert!(!packed.b_positive());
        assert_eq!(packed.c(), 3);
        assert!(packed.c_positive());
        assert_eq!(packed.omitted(), 2);
        assert_eq!(packed.raw(), raw);
    }

    #[test]
    fn test_mirrored_slots() {
        // Omitting x stores (w, z, y) and negates z and y.
        let half = (MAGNITUDE_SCALE / 2.0) as u64;
        let raw = half | 1 << 19 | half << 20 | 1 << 39 | half << 40 | 1 << 59;
        let packed = PackedRotation::from_raw(raw);
        let value = 0.5 * FRAC_1_SQRT_2;
        let mirrored = packed.decode(RotationSignPolicy::Mirrored);
        assert!(close(mirrored.w, value));
        assert!(close(mirrored.z, -value));
        assert!(close(mirrored.y, -value));
        let verbatim = packed.decode(RotationSignPolicy::Verbatim);
        assert!(close(verbatim.z, value));
        assert!(close(verbatim.y, value));
        assert!(close(mirrored.x, verbatim.x));
        assert!(mirrored.x > 0.0);
    }

    #[test]
    fn test_omitted_is_non_negative() {
        let rotation = Quat::from_xyzw(0.1, -0.9, 0.3, 0.2).normalize();
        let packed = PackedRotation::encode(rotation, RotationSignPolicy::Mirrored).unwrap();
        assert_eq!(packed.omitted(), 1);
        let decoded = packed.decode(RotationSignPolicy::Mirrored);
        assert!(decoded.y >= 0.0);
        assert!(decoded.abs_diff_eq(-rotation, 1e-4));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            PackedRotation::encode(Quat::from_xyzw(f32::NAN, 0.0, 0.0, 1.0), Default::default()),
            Err(FormatError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            PackedRotation::encode(Quat::from_xyzw(0.0, 0.0, 0.0, 2.0), Default::default()),
            Err(FormatError::ValueOutOfRange { .. })
        ));
    }

    #[test]
    fn test_padding_must_be_zero() {
        let raw = 1u64 << 63;
        let mut reader = Cursor::new(raw.to_le_bytes());
        let result: BinResult<PackedRotation> = reader.read_le();
        assert!(result.is_err());

        let mut reader = Cursor::new((3u64 << 60).to_le_bytes());
        let packed: PackedRotation = reader.read_le().unwrap();
        assert_eq!(packed.omitted(), 3);
    }

    #[test]
    fn test_static_rotation_policy() {
        let stored = [0.0, 0.0, 0.0, -1.0];
        assert_eq!(
            decode_static(stored, RotationSignPolicy::Mirrored),
            Quat::IDENTITY
        );
        assert_eq!(
            encode_static(Quat::IDENTITY, RotationSignPolicy::Mirrored),
            stored
        );
        assert_eq!(
            decode_static([0.0, 0.0, 0.0, 1.0], RotationSignPolicy::Verbatim),
            Quat::IDENTITY
        );
    }

    #[test]
    fn test_make_continuous() {
        let a = Quat::from_rotation_z(0.1);
        let mut frames = [a, -Quat::from_rotation_z(0.2), Quat::from_rotation_z(0.3)];
        make_continuous(&mut frames);
        assert!(frames.windows(2).all(|pair| pair[0].dot(pair[1]) >= 0.0));
        assert_eq!(frames[0], a);
    }

    fn unit_quat() -> impl Strategy<Value = Quat> {
        (
            -1.0f32..1.0,
            -1.0f32..1.0,
            -1.0f32..1.0,
            -1.0f32..1.0,
        )
            .prop_filter("non-degenerate", |(x, y, z, w)| {
                x * x + y * y + z * z + w * w > 0.01
            })
            .prop_map(|(x, y, z, w)| Quat::from_xyzw(x, y, z, w).normalize())
    }

    proptest! {
        #[test]
        fn test_round_trip(rotation in unit_quat(), mirrored in any::<bool>()) {
            let policy = if mirrored {
                RotationSignPolicy::Mirrored
            } else {
                RotationSignPolicy::Verbatim
            };
            let packed = PackedRotation::encode(rotation, policy).unwrap();
            let decoded = packed.decode(policy);
            // Same rotation, possibly on the other hemisphere.
            let expected = if decoded.dot(rotation) < 0.0 { -rotation } else { rotation };
            for (actual, expected) in decoded.to_array().into_iter().zip(expected.to_array()) {
                prop_assert!(close(actual, expected), "{} vs {}", decoded, expected);
            }
        }

        #[test]
        fn test_reencode_is_stable(raw in 0u64..(1u64 << 62)) {
            let packed = PackedRotation::from_raw(raw);
            let decoded = packed.decode(RotationSignPolicy::Mirrored);
            prop_assume!((decoded.length() - 1.0).abs() <= 1e-5);
            let again = PackedRotation::encode(decoded, RotationSignPolicy::Mirrored).unwrap();
            let redecoded = again.decode(RotationSignPolicy::Mirrored);
            let expected = if redecoded.dot(decoded) < 0.0 { -decoded } else { decoded };
            prop_assert!(redecoded.abs_diff_eq(expected, 1e-4));
        }
    }
}
