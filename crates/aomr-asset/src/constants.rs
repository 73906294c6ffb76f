//! Format constants shared by both containers.

use std::fmt::{self, Display, Formatter};

/// `"BTMA"` read as a little-endian `u32`.
pub const TMA_MAGIC: u32 = 1095586882;
pub const TMA_VERSION: u32 = 12;

/// `"BTMM"` read as a little-endian `u32`.
pub const TMM_MAGIC: u32 = 1296913474;
pub const TMM_VERSION: u32 = 35;

/// `"DP"`, written after the version of both containers.
pub const CONTAINER_MARKER: u16 = 20548;

/// `"VX"` trailer marker of mesh files.
pub const TRAILER_MARKER_VX: u16 = 22614;
/// `"VS"` trailer marker of mesh files.
pub const TRAILER_MARKER_VS: u16 = 21334;

pub const TMA_EXTENSION: &str = "tma";
pub const TMM_EXTENSION: &str = "tmm";
pub const TMM_DATA_EXTENSION: &str = "tmm.data";

/// Size of the fixed container header: magic, version and marker.
pub const HEADER_SIZE: u64 = 10;

pub const POSITION_FRAME_SIZE: u64 = 12;
pub const ROTATION_FRAME_SIZE: u64 = 8;

pub const VERTEX_SIZE: u64 = 16;
pub const TRIANGLE_SIZE: u64 = 6;
pub const WEIGHTS_SIZE: u64 = 8;
pub const HEIGHT_SIZE: u64 = 2;

/// Which of the two containers a buffer holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    Animation,
    Mesh,
}

impl ContainerKind {
    pub const ALL: [ContainerKind; 2] = [ContainerKind::Animation, ContainerKind::Mesh];

    pub fn from_magic(magic: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.magic() == magic)
    }

    pub const fn magic(self) -> u32 {
        match self {
            ContainerKind::Animation => TMA_MAGIC,
            ContainerKind::Mesh => TMM_MAGIC,
        }
    }

    pub const fn version(self) -> u32 {
        match self {
            ContainerKind::Animation => TMA_VERSION,
            ContainerKind::Mesh => TMM_VERSION,
        }
    }

    pub const fn extension(self) -> &'static str {
        match self {
            ContainerKind::Animation => TMA_EXTENSION,
            ContainerKind::Mesh => TMM_EXTENSION,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            ContainerKind::Animation => "Age of Mythology Retold animation",
            ContainerKind::Mesh => "Age of Mythology Retold mesh",
        }
    }
}

impl Display for ContainerKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ContainerKind::Animation => write!(f, "TMA"),
            ContainerKind::Mesh => write!(f, "TMM"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_magic_spells_container_name() {
        assert_eq!(&TMA_MAGIC.to_le_bytes(), b"BTMA");
        assert_eq!(&TMM_MAGIC.to_le_bytes(), b"BTMM");
        assert_eq!(&CONTAINER_MARKER.to_le_bytes(), b"DP");
        assert_eq!(&TRAILER_MARKER_VX.to_le_bytes(), b"VX");
        assert_eq!(&TRAILER_MARKER_VS.to_le_bytes(), b"VS");
    }

    #[test]
    fn test_kind_from_magic() {
        assert_eq!(
            ContainerKind::from_magic(TMA_MAGIC),
            Some(ContainerKind::Animation)
        );
        assert_eq!(ContainerKind::from_magic(TMM_MAGIC), Some(ContainerKind::Mesh));
        assert_eq!(ContainerKind::from_magic(0), None);
    }
}
