//! The flat record stream format.
//!
//! All integers are big-endian. A stream starts with a header (marker
//! string, then an `i32` format version) followed by records until one with
//! the terminator flag is read.
//!
//! Record layout:
//!
//! | field            | encoding                    |
//! |------------------|-----------------------------|
//! | name             | string                      |
//! | comment          | string, `-1` for none       |
//! | compressed size  | `i64`                       |
//! | crc              | `i64`                       |
//! | extra            | bytes, `-1` for none        |
//! | method           | `i32`                       |
//! | size             | `i64`                       |
//! | packed time      | `u32`                       |
//! | terminator       | one byte, 0 or 1            |
//! | nested           | one byte, 0 or 1            |
//!
//! Strings and byte arrays carry an `i32` length prefix. A plain record is
//! followed by its body as a byte array; a nested record is followed by an
//! inline record stream (no header) closed by its own terminator.

use super::DosTime;
use crate::errors::FormatError;
use std::io::Write;

/// Marker written at the start of every record stream.
pub const MARKER: &str = "SAR";

/// Format version this crate reads and writes.
pub const FORMAT_VERSION: i32 = 2;

/// Name of the terminator record.
pub const TERMINATOR_NAME: &str = "<eof-sar>";

const NULL_LENGTH: i32 = -1;

/// Header fields of one container entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ArchiveRecord {
    /// Entry name.
    pub name: String,
    /// Entry comment.
    pub comment: Option<String>,
    /// Compressed size as recorded by the source container, `-1` if unknown.
    pub compressed_size: i64,
    /// CRC-32 of the uncompressed content, `-1` if unknown.
    pub crc: i64,
    /// Extra field bytes.
    pub extra: Option<Vec<u8>>,
    /// Compression method (0 stored, 8 deflated).
    pub method: i32,
    /// Uncompressed size, `-1` if unknown.
    pub size: i64,
    /// Last modification time.
    pub dos_time: DosTime,
    /// Marks the end of a record stream.
    pub terminator: bool,
    /// The body is itself a record stream.
    pub nested: bool,
}

impl ArchiveRecord {
    /// Creates a plain record for the given entry name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            compressed_size: -1,
            crc: -1,
            size: -1,
            ..Self::default()
        }
    }

    /// The record that closes a stream.
    #[must_use]
    pub fn terminator() -> Self {
        Self {
            terminator: true,
            ..Self::new(TERMINATOR_NAME)
        }
    }
}

/// Writes a record stream.
#[derive(Debug)]
pub struct RecordWriter<W: Write> {
    out: W,
}

impl<W: Write> RecordWriter<W> {
    /// Wraps a writer.
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    /// Writes the stream header.
    pub fn write_header(&mut self) -> std::io::Result<()> {
        self.write_string(Some(MARKER))?;
        self.out.write_all(&FORMAT_VERSION.to_be_bytes())
    }

    /// Writes a plain record followed by its body.
    pub fn write_entry(&mut self, record: &ArchiveRecord, body: &[u8]) -> std::io::Result<()> {
        self.write_fields(record)?;
        self.write_bytes(Some(body))
    }

    /// Writes the fields of a nested record. The caller writes the nested
    /// records next and closes them with [`RecordWriter::write_terminator`].
    pub fn begin_nested(&mut self, record: &ArchiveRecord) -> std::io::Result<()> {
        let nested = ArchiveRecord {
            nested: true,
            terminator: false,
            ..record.clone()
        };
        self.write_fields(&nested)
    }

    /// Writes the terminator record.
    pub fn write_terminator(&mut self) -> std::io::Result<()> {
        self.write_fields(&ArchiveRecord::terminator())
    }

    /// Returns the wrapped writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_fields(&mut self, record: &ArchiveRecord) -> std::io::Result<()> {
        self.write_string(Some(&record.name))?;
        self.write_string(record.comment.as_deref())?;
        self.out.write_all(&record.compressed_size.to_be_bytes())?;
        self.out.write_all(&record.crc.to_be_bytes())?;
        self.write_bytes(record.extra.as_deref())?;
        self.out.write_all(&record.method.to_be_bytes())?;
        self.out.write_all(&record.size.to_be_bytes())?;
        self.out.write_all(&record.dos_time.raw().to_be_bytes())?;
        self.out.write_all(&[u8::from(record.terminator), u8::from(record.nested)])
    }

    fn write_string(&mut self, value: Option<&str>) -> std::io::Result<()> {
        self.write_bytes(value.map(str::as_bytes))
    }

    fn write_bytes(&mut self, value: Option<&[u8]>) -> std::io::Result<()> {
        match value {
            None => self.out.write_all(&NULL_LENGTH.to_be_bytes()),
            Some(bytes) => {
                let len = i32::try_from(bytes.len()).map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("field of {} bytes does not fit a record", bytes.len()),
                    )
                })?;
                self.out.write_all(&len.to_be_bytes())?;
                self.out.write_all(bytes)
            }
        }
    }
}

/// Reads a record stream from memory.
#[derive(Debug)]
pub struct RecordReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> RecordReader<'a> {
    /// Creates a reader over the given bytes.
    #[must_use]
    pub const fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    /// Reads and checks the stream header.
    ///
    /// # Errors
    ///
    /// `BadMarker` or `UnsupportedVersion` if the header does not match this
    /// format, `Truncated` if the input is too short.
    pub fn read_header(&mut self) -> Result<(), FormatError> {
        let marker = self.read_string("stream marker")?.unwrap_or_default();
        if marker != MARKER {
            return Err(FormatError::BadMarker {
                expected: MARKER.to_string(),
                found: marker,
            });
        }
        let version = self.read_i32("format version")?;
        if version != FORMAT_VERSION {
            return Err(FormatError::UnsupportedVersion {
                expected: FORMAT_VERSION,
                found: version,
            });
        }
        Ok(())
    }

    /// Reads the fields of the next record.
    pub fn read_record(&mut self) -> Result<ArchiveRecord, FormatError> {
        let name = self
            .read_string("record name")?
            .ok_or_else(|| FormatError::Container("record without a name".to_string()))?;
        Ok(ArchiveRecord {
            comment: self.read_string("record comment")?,
            compressed_size: self.read_i64("compressed size")?,
            crc: self.read_i64("crc")?,
            extra: self.read_bytes("extra field")?.map(<[u8]>::to_vec),
            method: self.read_i32("method")?,
            size: self.read_i64("size")?,
            dos_time: DosTime::from_raw(u32::from_be_bytes(self.take_array("time")?)),
            terminator: self.read_flag("terminator flag")?,
            nested: self.read_flag("nested flag")?,
            name,
        })
    }

    /// Reads the body of a plain record.
    pub fn read_body(&mut self) -> Result<&'a [u8], FormatError> {
        self.read_bytes("record body")?
            .ok_or_else(|| FormatError::Container("plain record without a body".to_string()))
    }

    /// Returns true once every byte has been consumed.
    #[must_use]
    pub const fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8], FormatError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.input.len())
            .ok_or_else(|| FormatError::Truncated(what.to_string()))?;
        let slice = &self.input[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, what)?);
        Ok(out)
    }

    fn read_i32(&mut self, what: &str) -> Result<i32, FormatError> {
        Ok(i32::from_be_bytes(self.take_array(what)?))
    }

    fn read_i64(&mut self, what: &str) -> Result<i64, FormatError> {
        Ok(i64::from_be_bytes(self.take_array(what)?))
    }

    fn read_flag(&mut self, what: &str) -> Result<bool, FormatError> {
        match self.take(1, what)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(FormatError::Container(format!("invalid {what} value {other}"))),
        }
    }

    fn read_bytes(&mut self, what: &str) -> Result<Option<&'a [u8]>, FormatError> {
        let len = self.read_i32(what)?;
        if len == NULL_LENGTH {
            return Ok(None);
        }
        let len = usize::try_from(len)
            .map_err(|_| FormatError::Container(format!("negative length {len} for {what}")))?;
        self.take(len, what).map(Some)
    }

    fn read_string(&mut self, what: &str) -> Result<Option<String>, FormatError> {
        self.read_bytes(what)?
            .map(|bytes| {
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| FormatError::Container(format!("{what} is not valid UTF-8")))
            })
            .transpose()
    }
}
