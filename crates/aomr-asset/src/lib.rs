//! Codecs for Age of Mythology Retold asset containers.
//!
//! This library reads and writes the animation container (`.tma`) and the
//! mesh container (`.tmm`, with its `.tmm.data` geometry buffer) into owned
//! models. Every field with a known invariant is checked on decode and
//! again before encode, and regions whose meaning is unknown are carried
//! byte for byte, so re-encoding a decoded file gives back the same bytes.
//!
//! Records are described as binrw schemas; packed rotations and vectors
//! are modular-bitfield words.

pub mod constants;
pub mod cursor;
pub mod error;
pub mod header;
pub mod rotation;
pub mod skeleton;
pub mod validate;
pub mod vector;

#[cfg(feature = "tma")]
/// Animation container.
pub mod tma;

#[cfg(feature = "tmm")]
/// Mesh container and its geometry buffer.
pub mod tmm;

pub use constants::ContainerKind;
pub use error::{FormatError, Violation};
pub use header::{probe, ImportMetadata};
pub use rotation::RotationSignPolicy;

/// Knobs for decoding untrusted buffers.
#[derive(Debug, Clone)]
pub struct DecodeParams {
    /// Largest element count accepted for any table.
    pub max_table_len: u32,
    /// Fail when bytes are left after the last stage.
    pub reject_trailing_bytes: bool,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            max_table_len: 1 << 24,
            reject_trailing_bytes: true,
        }
    }
}
