//! Positioned sequential access over an in-memory container.
//!
//! Records are declared as binrw schemas; this module provides the
//! primitives those schemas share (UTF-16 strings, opaque runs, counted
//! arrays with sanity checks) and the [`Walker`] / [`Emitter`] pair that
//! drive a container stage by stage.

use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

use binrw::{binrw, BinRead, BinResult, BinWrite, Endian};
use log::{trace, warn};

use crate::{
    error::{FormatError, Violation},
    DecodeParams,
};

/// Bytes left between the current position and the end of the stream.
pub fn remaining<R: Seek>(reader: &mut R) -> io::Result<u64> {
    let pos = reader.stream_position()?;
    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(pos))?;
    Ok(end.saturating_sub(pos))
}

/// Fail with an end-of-file error if fewer than `needed` bytes are left.
///
/// Used before reading any counted run so a corrupt count is reported
/// instead of allocating for it.
pub fn ensure_remaining<R: Seek>(reader: &mut R, needed: u64, what: &str) -> BinResult<()> {
    let left = remaining(reader)?;
    if needed > left {
        return Err(binrw::Error::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{} needs {} bytes, {} left", what, needed, left),
        )));
    }
    Ok(())
}

/// Returns `width` bits of `value` starting at bit `offset`, lowest bits first.
pub fn extract_bits(value: u64, offset: u32, width: u32) -> u64 {
    if width == 0 || offset >= u64::BITS {
        return 0;
    }
    let shifted = value >> offset;
    if width >= u64::BITS {
        shifted
    } else {
        shifted & ((1u64 << width) - 1)
    }
}

/// Reads a `u32` code unit count followed by that many UTF-16 units.
pub fn read_utf16<R: Read + Seek>(reader: &mut R, endian: Endian, _: ()) -> BinResult<String> {
    let pos = reader.stream_position()?;
    let count = u32::read_options(reader, endian, ())?;
    ensure_remaining(reader, u64::from(count) * 2, "string")?;
    let units = (0..count)
        .map(|_| u16::read_options(reader, endian, ()))
        .collect::<BinResult<Vec<u16>>>()?;
    String::from_utf16(&units)
        .map_err(|_| Violation::new("string", "valid UTF-16", format!("{:?}", units)).into_binrw(pos))
}

pub fn write_utf16<W: Write + Seek>(
    value: &String,
    writer: &mut W,
    endian: Endian,
    _: (),
) -> BinResult<()> {
    let pos = writer.stream_position()?;
    let units: Vec<u16> = value.encode_utf16().collect();
    let count = u32::try_from(units.len()).map_err(|_| {
        Violation::new("string length", "at most u32::MAX units", units.len()).into_binrw(pos)
    })?;
    count.write_options(writer, endian, ())?;
    units.write_options(writer, endian, ())
}

/// Reads `len` raw bytes after checking they are available.
pub fn read_bytes<R: Read + Seek>(
    reader: &mut R,
    _endian: Endian,
    (len,): (u32,),
) -> BinResult<Vec<u8>> {
    ensure_remaining(reader, u64::from(len), "opaque block")?;
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Reads `count` records of at least `stride` bytes each.
pub fn read_records<R, T>(
    reader: &mut R,
    endian: Endian,
    (count, stride): (u64, u64),
) -> BinResult<Vec<T>>
where
    R: Read + Seek,
    T: for<'a> BinRead<Args<'a> = ()>,
{
    ensure_remaining(reader, count.saturating_mul(stride), "record array")?;
    (0..count)
        .map(|_| T::read_options(reader, endian, ()))
        .collect()
}

/// A length-prefixed run of bytes kept as-is.
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpaqueBlock {
    #[br(temp)]
    #[bw(try_calc = u32::try_from(bytes.len()))]
    length: u32,
    #[br(parse_with = read_bytes, args(length))]
    pub bytes: Vec<u8>,
}

impl OpaqueBlock {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

/// A standalone UTF-16 string record, used for the name tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utf16Name(pub String);

impl BinRead for Utf16Name {
    type Args<'a> = ();

    fn read_options<R: Read + Seek>(
        reader: &mut R,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<Self> {
        read_utf16(reader, endian, args).map(Self)
    }
}

impl BinWrite for Utf16Name {
    type Args<'a> = ();

    fn write_options<W: Write + Seek>(
        &self,
        writer: &mut W,
        endian: Endian,
        args: Self::Args<'_>,
    ) -> BinResult<()> {
        write_utf16(&self.0, writer, endian, args)
    }
}

/// Reads a byte that must be 0 or 1.
pub fn decode_bool(field: &str, value: u8) -> Result<bool, Violation> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(Violation::new(field, "0 or 1", other)),
    }
}

/// Sequential reader over a whole container.
pub struct Walker<'a> {
    cursor: Cursor<&'a [u8]>,
    params: &'a DecodeParams,
}

impl<'a> Walker<'a> {
    pub fn new(bytes: &'a [u8], params: &'a DecodeParams) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            params,
        }
    }

    pub fn offset(&self) -> u64 {
        self.cursor.position()
    }

    pub fn len(&self) -> u64 {
        self.cursor.get_ref().len() as u64
    }

    pub fn remaining(&self) -> u64 {
        self.len().saturating_sub(self.offset())
    }

    pub fn seek(&mut self, offset: u64) -> Result<(), FormatError> {
        if offset > self.len() {
            return Err(FormatError::UnexpectedEndOfBuffer { offset: self.len() });
        }
        self.cursor.set_position(offset);
        Ok(())
    }

    pub fn read<T>(&mut self) -> Result<T, FormatError>
    where
        T: for<'b> BinRead<Args<'b> = ()>,
    {
        self.read_args(())
    }

    pub fn read_args<'b, T: BinRead>(&mut self, args: T::Args<'b>) -> Result<T, FormatError> {
        let offset = self.offset();
        T::read_options(&mut self.cursor, Endian::Little, args)
            .map_err(|err| FormatError::from_binrw(err, offset))
    }

    /// Checks a declared table length against the configured cap and the
    /// bytes left, given the smallest possible record size.
    pub fn ensure_table(
        &self,
        field: &str,
        count: u32,
        min_record_size: u64,
    ) -> Result<(), FormatError> {
        if count > self.params.max_table_len {
            return Err(Violation::new(
                format!("{} count", field),
                format!("at most {}", self.params.max_table_len),
                count,
            )
            .at(self.offset()));
        }
        if u64::from(count) * min_record_size > self.remaining() {
            return Err(FormatError::UnexpectedEndOfBuffer {
                offset: self.len(),
            });
        }
        Ok(())
    }

    pub fn read_table<T>(
        &mut self,
        field: &str,
        count: u32,
        min_record_size: u64,
    ) -> Result<Vec<T>, FormatError>
    where
        T: for<'b> BinRead<Args<'b> = ()>,
    {
        self.read_table_args(field, count, min_record_size, ())
    }

    pub fn read_table_args<'b, T>(
        &mut self,
        field: &str,
        count: u32,
        min_record_size: u64,
        args: T::Args<'b>,
    ) -> Result<Vec<T>, FormatError>
    where
        T: BinRead,
        T::Args<'b>: Clone,
    {
        self.ensure_table(field, count, min_record_size)?;
        let mut records = Vec::with_capacity(count as usize);
        for index in 0..count {
            trace!("Reading {} #{} at {:#x}", field, index, self.offset());
            records.push(self.read_args(args.clone())?);
        }
        Ok(records)
    }

    /// Attach the current offset to a failed check.
    pub fn check(&self, result: Result<(), Violation>) -> Result<(), FormatError> {
        self.check_at(self.offset(), result)
    }

    pub fn check_at(&self, offset: u64, result: Result<(), Violation>) -> Result<(), FormatError> {
        result.map_err(|violation| violation.at(offset))
    }

    /// Finish the walk, rejecting unread bytes unless configured otherwise.
    pub fn finish(self) -> Result<(), FormatError> {
        let left = self.remaining();
        if left == 0 {
            return Ok(());
        }
        if self.params.reject_trailing_bytes {
            return Err(Violation::new("end of buffer", "no trailing bytes", format!("{} bytes", left))
                .at(self.offset()));
        }
        warn!("Ignoring {} trailing bytes at {:#x}", left, self.offset());
        Ok(())
    }
}

/// Sequential writer producing a whole container in memory.
#[derive(Default)]
pub struct Emitter {
    cursor: Cursor<Vec<u8>>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn offset(&self) -> u64 {
        self.cursor.position()
    }

    pub fn write<T>(&mut self, value: &T) -> Result<(), FormatError>
    where
        T: for<'b> BinWrite<Args<'b> = ()>,
    {
        self.write_args(value, ())
    }

    pub fn write_args<'b, T: BinWrite>(
        &mut self,
        value: &T,
        args: T::Args<'b>,
    ) -> Result<(), FormatError> {
        let offset = self.offset();
        value
            .write_options(&mut self.cursor, Endian::Little, args)
            .map_err(|err| FormatError::from_binrw(err, offset))
    }

    pub fn write_all<T>(&mut self, values: &[T]) -> Result<(), FormatError>
    where
        T: for<'b> BinWrite<Args<'b> = ()>,
    {
        values.iter().try_for_each(|value| self.write(value))
    }

    pub fn check(&self, result: Result<(), Violation>) -> Result<(), FormatError> {
        result.map_err(|violation| violation.at(self.offset()))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.cursor.into_inner()
    }
}

/// Converts a table length to its on-disk `u32` count.
pub fn table_len(field: &str, len: usize) -> Result<u32, FormatError> {
    u32::try_from(len).map_err(|_| FormatError::out_of_range(format!("{} count", field), len))
}
