//! Bones shared by animation and mesh containers.

use std::io::{Read, Seek, Write};

use binrw::{binrw, BinRead, BinResult, BinWrite, Endian};
use glam::{Mat4, Vec3};

use crate::{
    cursor::{read_utf16, write_utf16},
    error::Violation,
    validate::expect_index,
};

/// Parent reference of a bone or attachment, `-1` on disk for none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct BoneIndex(pub Option<u32>);

impl BoneIndex {
    pub const ROOT: BoneIndex = BoneIndex(None);

    pub fn new(index: u32) -> Self {
        Self(Some(index))
    }

    pub fn get(self) -> Option<usize> {
        self.0.map(|index| index as usize)
    }

    pub fn is_root(self) -> bool {
        self.0.is_none()
    }

    /// Checks the index against a table of `len` entries.
    pub fn check(self, field: &str, len: usize) -> Result<(), Violation> {
        match self.0 {
            Some(index) => expect_index(field, index, len),
            None => Ok(()),
        }
    }
}

impl BinRead for BoneIndex {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        _: Self::Args<'_>,
    ) -> BinResult<Self> {
        let pos = reader.stream_position()?;
        let index = i32::read_options(reader, endian, ())?;
        if index == -1 {
            Ok(Self(None))
        } else if index < 0 {
            Err(Violation::new("bone index", "-1 or a non-negative index", index).into_binrw(pos))
        } else {
            Ok(Self(Some(index as u32)))
        }
    }
}

impl BinWrite for BoneIndex {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        _: Self::Args<'_>,
    ) -> BinResult<()> {
        let pos = writer.stream_position()?;
        let index = match self.0 {
            None => -1,
            Some(index) => i32::try_from(index).map_err(|_| {
                Violation::new("bone index", "at most i32::MAX", index).into_binrw(pos)
            })?,
        };
        index.write_options(writer, endian, ())
    }
}

/// Collision sphere carried by mesh bones.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneCollision {
    #[br(map = Vec3::from_array)]
    #[bw(map = |offset: &Vec3| offset.to_array())]
    pub offset: Vec3,
    pub radius: f32,
}

/// A bone record. Mesh bones carry a collision sphere, animation bones
/// do not; the flag is passed as the import argument.
#[binrw]
#[brw(little, import(with_collision: bool))]
#[derive(Debug, Clone, PartialEq)]
pub struct Bone {
    #[br(parse_with = read_utf16)]
    #[bw(write_with = write_utf16)]
    pub name: String,
    pub parent: BoneIndex,
    #[br(if(with_collision))]
    #[bw(if(with_collision))]
    pub collision: Option<BoneCollision>,
    #[br(map = |cols: [f32; 16]| Mat4::from_cols_array(&cols))]
    #[bw(map = |matrix: &Mat4| matrix.to_cols_array())]
    pub parent_space: Mat4,
    #[br(map = |cols: [f32; 16]| Mat4::from_cols_array(&cols))]
    #[bw(map = |matrix: &Mat4| matrix.to_cols_array())]
    pub world_space: Mat4,
    #[br(map = |cols: [f32; 16]| Mat4::from_cols_array(&cols))]
    #[bw(map = |matrix: &Mat4| matrix.to_cols_array())]
    pub inverse_bind: Mat4,
}

/// Smallest on-disk bone: empty name, parent and three matrices.
pub const MIN_BONE_SIZE: u64 = 4 + 4 + 3 * 64;
/// Collision offset and radius.
pub const COLLISION_SIZE: u64 = 16;

impl Bone {
    pub fn new(name: impl Into<String>, parent: BoneIndex) -> Self {
        Self {
            name: name.into(),
            parent,
            collision: None,
            parent_space: Mat4::IDENTITY,
            world_space: Mat4::IDENTITY,
            inverse_bind: Mat4::IDENTITY,
        }
    }

    pub fn with_collision(mut self, offset: Vec3, radius: f32) -> Self {
        self.collision = Some(BoneCollision { offset, radius });
        self
    }
}

/// Read-only view over a flat bone table where parents are indices.
#[derive(Debug, Clone, Copy)]
pub struct Skeleton<'a> {
    bones: &'a [Bone],
}

impl<'a> Skeleton<'a> {
    pub fn new(bones: &'a [Bone]) -> Self {
        Self { bones }
    }

    pub fn bones(&self) -> &'a [Bone] {
        self.bones
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.bones.iter().position(|bone| bone.name == name)
    }

    pub fn roots(&self) -> impl Iterator<Item = usize> + 'a {
        self.bones
            .iter()
            .enumerate()
            .filter(|(_, bone)| bone.parent.is_root())
            .map(|(index, _)| index)
    }

    pub fn children(&self, parent: usize) -> impl Iterator<Item = usize> + 'a {
        self.bones
            .iter()
            .enumerate()
            .filter(move |(_, bone)| bone.parent.get() == Some(parent))
            .map(|(index, _)| index)
    }

    /// Checks that parents are in range and the bones form a forest.
    pub fn validate(&self) -> Result<(), Violation> {
        for (index, bone) in self.bones.iter().enumerate() {
            bone.parent
                .check(&format!("parent of bone {:?}", bone.name), self.bones.len())?;
            if bone.parent.get() == Some(index) {
                return Err(Violation::new(
                    format!("parent of bone {:?}", bone.name),
                    "another bone",
                    index,
                ));
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            Visiting,
            Done,
        }
        let mut marks = vec![Mark::Unvisited; self.bones.len()];
        let mut path = Vec::new();
        for start in 0..self.bones.len() {
            let mut current = Some(start);
            while let Some(index) = current {
                match marks[index] {
                    Mark::Done => break,
                    Mark::Visiting => {
                        return Err(Violation::new(
                            "bone hierarchy",
                            "no cycles",
                            format!("cycle through bone {:?}", self.bones[index].name),
                        ))
                    }
                    Mark::Unvisited => {
                        marks[index] = Mark::Visiting;
                        path.push(index);
                        current = self.bones[index].parent.get();
                    }
                }
            }
            for index in path.drain(..) {
                marks[index] = Mark::Done;
            }
        }
        Ok(())
    }

    /// Checks that every bone has a collision record, or none has.
    pub fn validate_collision(&self, with_collision: bool) -> Result<(), Violation> {
        match self
            .bones
            .iter()
            .find(|bone| bone.collision.is_some() != with_collision)
        {
            Some(bone) => Err(Violation::new(
                format!("collision of bone {:?}", bone.name),
                if with_collision { "present" } else { "absent" },
                if with_collision { "absent" } else { "present" },
            )),
            None => Ok(()),
        }
    }
}
