//! Container header, import metadata block and format probing.

use std::io::Cursor;

use binrw::{binrw, BinRead};

use crate::{
    constants::{ContainerKind, CONTAINER_MARKER, HEADER_SIZE},
    cursor::{read_bytes, read_records, read_utf16, write_utf16},
    error::{FormatError, Violation},
    validate::expect_eq,
};

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub magic: u32,
    pub version: u32,
    pub marker: u16,
}

impl ContainerHeader {
    pub fn new(kind: ContainerKind) -> Self {
        Self {
            magic: kind.magic(),
            version: kind.version(),
            marker: CONTAINER_MARKER,
        }
    }

    /// Checks the header of a container expected to be `kind`.
    ///
    /// A wrong magic is an invariant violation, a right magic with a wrong
    /// version is reported as an unsupported version.
    pub fn check(&self, kind: ContainerKind) -> Result<(), FormatError> {
        if self.magic != kind.magic() {
            return Err(Violation::new(
                format!("{} magic", kind),
                kind.magic(),
                self.magic,
            )
            .at(0));
        }
        if self.version != kind.version() {
            return Err(FormatError::UnsupportedVersion {
                kind,
                expected: kind.version(),
                actual: self.version,
            });
        }
        expect_eq("container marker", CONTAINER_MARKER, self.marker).map_err(|err| err.at(8))
    }
}

/// Identifies the container held by `bytes` from its header.
pub fn probe(bytes: &[u8]) -> Result<ContainerKind, FormatError> {
    if (bytes.len() as u64) < HEADER_SIZE {
        return Err(FormatError::UnexpectedEndOfBuffer {
            offset: bytes.len() as u64,
        });
    }
    let header = ContainerHeader::read(&mut Cursor::new(bytes))
        .map_err(|err| FormatError::from_binrw(err, 0))?;
    let kind = ContainerKind::from_magic(header.magic).ok_or_else(|| {
        Violation::new(
            "magic",
            format!("{} or {}", ContainerKind::Animation.magic(), ContainerKind::Mesh.magic()),
            header.magic,
        )
        .at(0)
    })?;
    header.check(kind)?;
    Ok(kind)
}

/// Metadata the game's importer leaves behind, kept byte for byte.
///
/// By convention it holds a `u32` entry count followed by entries of a
/// name and 16 opaque bytes, see [`ImportMetadata::entries`].
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportMetadata {
    #[br(temp)]
    #[bw(try_calc = u32::try_from(bytes.len()))]
    byte_length: u32,
    #[br(parse_with = read_bytes, args(byte_length))]
    pub bytes: Vec<u8>,
}

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    #[br(parse_with = read_utf16)]
    #[bw(write_with = write_utf16)]
    pub name: String,
    pub data: [u8; 16],
}

#[binrw]
#[brw(little)]
struct ImportEntries {
    #[br(temp)]
    #[bw(try_calc = u32::try_from(entries.len()))]
    count: u32,
    #[br(parse_with = read_records, args(u64::from(count), 20))]
    entries: Vec<ImportEntry>,
}

impl ImportMetadata {
    /// The block exporters write: a zero entry count.
    pub fn empty() -> Self {
        Self {
            bytes: 0u32.to_le_bytes().to_vec(),
        }
    }

    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_entries(entries: Vec<ImportEntry>) -> Result<Self, FormatError> {
        let mut writer = Cursor::new(Vec::new());
        binrw::BinWrite::write(&ImportEntries { entries }, &mut writer)
            .map_err(|err| FormatError::from_binrw(err, 0))?;
        Ok(Self {
            bytes: writer.into_inner(),
        })
    }

    /// Parses the conventional entry list out of the block.
    pub fn entries(&self) -> Result<Vec<ImportEntry>, FormatError> {
        let mut reader = Cursor::new(self.bytes.as_slice());
        let entries = ImportEntries::read(&mut reader)
            .map_err(|err| FormatError::from_binrw(err, 0))?;
        let consumed = reader.position();
        if consumed != self.bytes.len() as u64 {
            return Err(Violation::new(
                "import metadata length",
                consumed,
                self.bytes.len(),
            )
            .at(consumed));
        }
        Ok(entries.entries)
    }
}

impl Default for ImportMetadata {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::{TMA_MAGIC, TMM_MAGIC};

    fn header_bytes(magic: u32, version: u32) -> Vec<u8> {
        let mut bytes = magic.to_le_bytes().to_vec();
        bytes.extend_from_slice(&version.to_le_bytes());
        bytes.extend_from_slice(&CONTAINER_MARKER.to_le_bytes());
        bytes
    }

    #[test]
    fn test_probe() {
        assert_eq!(
            probe(&header_bytes(TMA_MAGIC, 12)).unwrap(),
            ContainerKind::Animation
        );
        assert_eq!(probe(&header_bytes(TMM_MAGIC, 35)).unwrap(), ContainerKind::Mesh);
    }

    #[test]
    fn test_probe_rejects_bad_magic() {
        assert!(matches!(
            probe(&header_bytes(0x1234_5678, 12)),
            Err(FormatError::FormatInvariantViolation { offset: 0, .. })
        ));
    }

    #[test]
    fn test_probe_rejects_other_version() {
        assert!(matches!(
            probe(&header_bytes(TMM_MAGIC, 34)),
            Err(FormatError::UnsupportedVersion {
                kind: ContainerKind::Mesh,
                expected: 35,
                actual: 34
            })
        ));
    }

    #[test]
    fn test_probe_short_buffer() {
        assert!(matches!(
            probe(&[0x42, 0x54]),
            Err(FormatError::UnexpectedEndOfBuffer { offset: 2 })
        ));
    }

    #[test]
    fn test_import_entries() {
        let entries = vec![ImportEntry {
            name: "source.fbx".to_string(),
            data: [7; 16],
        }];
        let metadata = ImportMetadata::from_entries(entries.clone()).unwrap();
        assert_eq!(metadata.entries().unwrap(), entries);
        assert!(ImportMetadata::empty().entries().unwrap().is_empty());
    }
}
