use std::{
    fmt::{self, Display, Formatter},
    io,
};

use thiserror::Error;

use crate::constants::ContainerKind;

/// Error returned by every decode and encode operation of this crate.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unexpected end of buffer at offset {offset:#x}")]
    UnexpectedEndOfBuffer { offset: u64 },
    #[error("bad {field} at offset {offset:#x}: expected {expected}, found {actual}")]
    FormatInvariantViolation {
        offset: u64,
        field: String,
        expected: String,
        actual: String,
    },
    #[error("unsupported {kind} version {actual}, only version {expected} is supported")]
    UnsupportedVersion {
        kind: ContainerKind,
        expected: u32,
        actual: u32,
    },
    #[error("{field} value {value} cannot be packed")]
    ValueOutOfRange { field: String, value: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FormatError {
    pub fn out_of_range(field: impl Into<String>, value: impl Display) -> Self {
        FormatError::ValueOutOfRange {
            field: field.into(),
            value: value.to_string(),
        }
    }

    /// Translate an error raised while walking a binrw schema.
    ///
    /// `offset` is the start of the record being read, used when binrw
    /// itself carries no position.
    pub(crate) fn from_binrw(err: binrw::Error, offset: u64) -> Self {
        match err {
            binrw::Error::Backtrace(backtrace) => Self::from_binrw(*backtrace.error, offset),
            binrw::Error::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof => {
                FormatError::UnexpectedEndOfBuffer { offset }
            }
            binrw::Error::Io(err) => FormatError::Io(err),
            binrw::Error::BadMagic { pos, found } => FormatError::FormatInvariantViolation {
                offset: pos,
                field: "magic".to_string(),
                expected: "container magic".to_string(),
                actual: format!("{:?}", found),
            },
            binrw::Error::AssertFail { pos, message } => FormatError::FormatInvariantViolation {
                offset: pos,
                field: "assertion".to_string(),
                expected: message,
                actual: "failed".to_string(),
            },
            binrw::Error::Custom { pos, err } => match err.downcast_ref::<Violation>() {
                Some(violation) => violation.clone().at(pos),
                None => FormatError::FormatInvariantViolation {
                    offset: pos,
                    field: "record".to_string(),
                    expected: "well-formed record".to_string(),
                    actual: err.to_string(),
                },
            },
            other => FormatError::FormatInvariantViolation {
                offset,
                field: "record".to_string(),
                expected: "well-formed record".to_string(),
                actual: other.to_string(),
            },
        }
    }
}

/// A failed invariant, not yet tied to a buffer position.
///
/// Schemas raise it through `binrw::Error::Custom`, model checks return it
/// directly, and the stage walkers attach an offset with [`Violation::at`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl Violation {
    pub fn new(field: impl Into<String>, expected: impl Display, actual: impl Display) -> Self {
        Self {
            field: field.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn at(self, offset: u64) -> FormatError {
        FormatError::FormatInvariantViolation {
            offset,
            field: self.field,
            expected: self.expected,
            actual: self.actual,
        }
    }

    pub(crate) fn into_binrw(self, pos: u64) -> binrw::Error {
        binrw::Error::Custom {
            pos,
            err: Box::new(self),
        }
    }
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "bad {}: expected {}, found {}",
            self.field, self.expected, self.actual
        )
    }
}
