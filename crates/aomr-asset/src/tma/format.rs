use std::io::{Read, Seek, Write};

use binrw::{binrw, BinRead, BinResult, BinWrite, Endian};
use glam::{Quat, Vec3};

use crate::{
    constants::{POSITION_FRAME_SIZE, ROTATION_FRAME_SIZE},
    cursor::{decode_bool, read_records, read_utf16, write_utf16},
    error::Violation,
    rotation::{decode_static, encode_static, make_continuous, PackedRotation, RotationSignPolicy},
    skeleton::BoneIndex,
    validate::{expect_near, expect_range, expect_unit_norm, UNIT_TOLERANCE},
};

const POSITION_STATIC: u8 = 0;
const POSITION_ANIMATED: u8 = 1;
const ROTATION_STATIC: u8 = 0;
const ROTATION_ANIMATED: u8 = 3;

/// Counts and globals following the import metadata.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AnimationSummary {
    pub active_bone_count: u32,
    pub frame_count: u32,
    pub playtime: f32,
    pub root_position: [f32; 3],
    pub root_position_duplicate: [f32; 3],
    pub bone_count: u32,
    pub attachment_count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionKeys {
    /// One position for the whole clip, followed by a `w` of one.
    Static { position: Vec3, w: f32 },
    Animated(Vec<Vec3>),
}

impl PositionKeys {
    fn mode(&self) -> u8 {
        match self {
            PositionKeys::Static { .. } => POSITION_STATIC,
            PositionKeys::Animated(_) => POSITION_ANIMATED,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, PositionKeys::Static { .. })
    }

    /// Position at `frame`, clamped to the last key.
    pub fn at(&self, frame: usize) -> Option<Vec3> {
        match self {
            PositionKeys::Static { position, .. } => Some(*position),
            PositionKeys::Animated(frames) => frames
                .get(frame.min(frames.len().saturating_sub(1)))
                .copied(),
        }
    }
}

impl BinRead for PositionKeys {
    type Args<'a> = (u8, u32);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        (mode, frames): Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        match mode {
            POSITION_STATIC => {
                let position = <[f32; 3]>::read_options(reader, endian, ())?;
                let w = f32::read_options(reader, endian, ())?;
                Ok(PositionKeys::Static {
                    position: Vec3::from_array(position),
                    w,
                })
            }
            POSITION_ANIMATED => {
                let byte_length = u32::read_options(reader, endian, ())?;
                let expected = u64::from(frames) * POSITION_FRAME_SIZE;
                if u64::from(byte_length) != expected {
                    return Err(
                        Violation::new("position block length", expected, byte_length).into_binrw(pos),
                    );
                }
                let keys: Vec<[f32; 3]> =
                    read_records(reader, endian, (u64::from(frames), POSITION_FRAME_SIZE))?;
                Ok(PositionKeys::Animated(
                    keys.into_iter().map(Vec3::from_array).collect(),
                ))
            }
            other => Err(Violation::new("position mode", "0 or 1", other).into_binrw(pos)),
        }
    }
}

impl BinWrite for PositionKeys {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _: Self::Args<'_>,
    ) -> BinResult<()> {
        match self {
            PositionKeys::Static { position, w } => {
                position.to_array().write_options(writer, endian, ())?;
                w.write_options(writer, endian, ())
            }
            PositionKeys::Animated(keys) => {
                let pos = writer.stream_position()?;
                let byte_length = keys.len() as u64 * POSITION_FRAME_SIZE;
                let byte_length = u32::try_from(byte_length).map_err(|_| {
                    Violation::new("position block length", "at most u32::MAX", byte_length)
                        .into_binrw(pos)
                })?;
                byte_length.write_options(writer, endian, ())?;
                keys.iter()
                    .try_for_each(|key| key.to_array().write_options(writer, endian, ()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RotationKeys {
    /// Four floats as stored, see [`decode_static`] for their meaning.
    Static([f32; 4]),
    Animated(Vec<PackedRotation>),
}

impl RotationKeys {
    fn mode(&self) -> u8 {
        match self {
            RotationKeys::Static(_) => ROTATION_STATIC,
            RotationKeys::Animated(_) => ROTATION_ANIMATED,
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, RotationKeys::Static(_))
    }

    pub fn from_static(rotation: Quat, policy: RotationSignPolicy) -> Self {
        RotationKeys::Static(encode_static(rotation, policy))
    }

    /// Rotation at `frame`, clamped to the last key.
    pub fn at(&self, frame: usize, policy: RotationSignPolicy) -> Option<Quat> {
        match self {
            RotationKeys::Static(stored) => Some(decode_static(*stored, policy)),
            RotationKeys::Animated(frames) => frames
                .get(frame.min(frames.len().saturating_sub(1)))
                .map(|packed| packed.decode(policy)),
        }
    }
}

impl BinRead for RotationKeys {
    type Args<'a> = (u8, u32);

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        (mode, frames): Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        match mode {
            ROTATION_STATIC => Ok(RotationKeys::Static(<[f32; 4]>::read_options(
                reader,
                endian,
                (),
            )?)),
            ROTATION_ANIMATED => {
                let byte_length = u32::read_options(reader, endian, ())?;
                let expected = u64::from(frames) * ROTATION_FRAME_SIZE;
                if u64::from(byte_length) != expected {
                    return Err(
                        Violation::new("rotation block length", expected, byte_length).into_binrw(pos),
                    );
                }
                Ok(RotationKeys::Animated(read_records(
                    reader,
                    endian,
                    (u64::from(frames), ROTATION_FRAME_SIZE),
                )?))
            }
            other => Err(Violation::new("rotation mode", "0 or 3", other).into_binrw(pos)),
        }
    }
}

impl BinWrite for RotationKeys {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _: Self::Args<'_>,
    ) -> BinResult<()> {
        match self {
            RotationKeys::Static(stored) => stored.write_options(writer, endian, ()),
            RotationKeys::Animated(keys) => {
                let pos = writer.stream_position()?;
                let byte_length = keys.len() as u64 * ROTATION_FRAME_SIZE;
                let byte_length = u32::try_from(byte_length).map_err(|_| {
                    Violation::new("rotation block length", "at most u32::MAX", byte_length)
                        .into_binrw(pos)
                })?;
                byte_length.write_options(writer, endian, ())?;
                keys.write_options(writer, endian, ())
            }
        }
    }
}

/// Keys of one animated bone over the whole clip.
#[binrw]
#[brw(little, import(frame_count: u32))]
#[derive(Debug, Clone, PartialEq)]
pub struct BoneTrack {
    #[br(parse_with = read_utf16)]
    #[bw(write_with = write_utf16)]
    pub bone_name: String,
    #[br(temp, assert(track_flag == 1, Violation::new("track flag", 1, track_flag)))]
    #[bw(calc = 1u8)]
    track_flag: u8,
    #[br(temp)]
    #[bw(calc = position.mode())]
    position_mode: u8,
    #[br(temp)]
    #[bw(calc = rotation.mode())]
    rotation_mode: u8,
    #[br(temp, assert(reserved == 0, Violation::new("track reserved byte", 0, reserved)))]
    #[bw(calc = 0u8)]
    reserved: u8,
    #[br(temp, assert(frames == frame_count, Violation::new("track frame count", frame_count, frames)))]
    #[bw(calc = frame_count)]
    frames: u32,
    #[br(args(position_mode, frames))]
    pub position: PositionKeys,
    #[br(args(rotation_mode, frames))]
    pub rotation: RotationKeys,
    /// Trailing record, one in every component in files seen so far.
    pub trailer: [f32; 4],
}

/// Smallest on-disk track: empty name, flags, frame count, static keys and
/// the trailing record.
pub(crate) const MIN_TRACK_SIZE: u64 = 4 + 4 + 4 + 16 + 16 + 16;

impl BoneTrack {
    pub fn new(bone_name: impl Into<String>, position: PositionKeys, rotation: RotationKeys) -> Self {
        Self {
            bone_name: bone_name.into(),
            position,
            rotation,
            trailer: [1.0; 4],
        }
    }

    /// Checks key counts and static values against the clip.
    pub fn validate(&self, frame_count: u32) -> Result<(), Violation> {
        let field = |name: &str| format!("{} of track {:?}", name, self.bone_name);
        match &self.position {
            PositionKeys::Static { w, .. } => {
                expect_near(&field("static position w"), 1.0, *w, UNIT_TOLERANCE)?
            }
            PositionKeys::Animated(keys) if keys.len() != frame_count as usize => {
                return Err(Violation::new(field("position keys"), frame_count, keys.len()))
            }
            PositionKeys::Animated(_) => {}
        }
        match &self.rotation {
            RotationKeys::Static(stored) => expect_unit_norm(&field("static rotation"), stored)?,
            RotationKeys::Animated(keys) if keys.len() != frame_count as usize => {
                return Err(Violation::new(field("rotation keys"), frame_count, keys.len()))
            }
            RotationKeys::Animated(_) => {}
        }
        Ok(())
    }

    /// Per-frame rotations, negated where needed so neighbouring frames
    /// lie on the same hemisphere.
    pub fn rotations(&self, frame_count: u32, policy: RotationSignPolicy) -> Vec<Quat> {
        let mut rotations: Vec<Quat> = match &self.rotation {
            RotationKeys::Static(stored) => {
                vec![decode_static(*stored, policy); frame_count as usize]
            }
            RotationKeys::Animated(keys) => keys.iter().map(|key| key.decode(policy)).collect(),
        };
        make_continuous(&mut rotations);
        rotations
    }

    pub fn positions(&self, frame_count: u32) -> Vec<Vec3> {
        match &self.position {
            PositionKeys::Static { position, .. } => vec![*position; frame_count as usize],
            PositionKeys::Animated(keys) => keys.clone(),
        }
    }

    /// Turns animated channels whose keys never change into static ones.
    ///
    /// Returns whether anything changed.
    pub fn compact(&mut self, policy: RotationSignPolicy) -> bool {
        let mut changed = false;
        if let PositionKeys::Animated(keys) = &self.position {
            if let Some(first) = keys.first().copied() {
                if keys.iter().all(|key| *key == first) {
                    self.position = PositionKeys::Static {
                        position: first,
                        w: 1.0,
                    };
                    changed = true;
                }
            }
        }
        if let RotationKeys::Animated(keys) = &self.rotation {
            if let Some(first) = keys.first().copied() {
                if keys.iter().all(|key| *key == first) {
                    self.rotation = RotationKeys::from_static(first.decode(policy), policy);
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Attachment visibility event keyed on normalized clip time.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq)]
pub struct AnimationAttachment {
    pub parent: BoneIndex,
    pub time: f32,
    #[br(temp, assert(reserved_a == 0, Violation::new("attachment reserved word", 0, reserved_a)))]
    #[bw(calc = 0u32)]
    reserved_a: u32,
    #[br(temp, assert(reserved_b == 0, Violation::new("attachment reserved word", 0, reserved_b)))]
    #[bw(calc = 0u32)]
    reserved_b: u32,
    #[br(try_map = |flag: u8| decode_bool("attachment visibility", flag))]
    #[bw(map = |visible: &bool| u8::from(*visible))]
    pub visible: bool,
    #[br(parse_with = read_utf16)]
    #[bw(write_with = write_utf16)]
    pub name: String,
}

pub(crate) const MIN_ATTACHMENT_SIZE: u64 = 4 + 4 + 8 + 1 + 4;

impl AnimationAttachment {
    pub fn new(name: impl Into<String>, parent: BoneIndex, time: f32, visible: bool) -> Self {
        Self {
            parent,
            time,
            visible,
            name: name.into(),
        }
    }

    pub fn validate(&self, bone_count: usize) -> Result<(), Violation> {
        self.parent
            .check(&format!("parent of attachment {:?}", self.name), bone_count)
    }

    /// Whether the time is a fraction of the clip. Other values are kept
    /// as stored.
    pub fn is_time_normalized(&self) -> bool {
        expect_range("attachment time", 0.0..=1.0, self.time).is_ok()
    }
}
