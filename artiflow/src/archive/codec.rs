//! Container ⇄ record stream conversion.
//!
//! Plain records carry an entry's raw body with the method, sizes and CRC
//! recorded for it. Entries whose names end in `.zip` or `.jar` are expanded
//! into nested record streams when laying the inner entries out again
//! reproduces the entry's raw body byte for byte; otherwise they are stored
//! as plain records. A change inside an expanded nested archive only touches
//! the bytes of the changed inner entry instead of the whole blob.

use super::container::{deflate, read_container, write_container, ContainerEntry, METHOD_DEFLATED};
use super::record::{ArchiveRecord, RecordReader, RecordWriter};
use crate::errors::{FormatError, Result};
use flate2::Compression;
use std::io::Write;
use tracing::debug;

const NESTED_EXTENSIONS: [&str; 2] = [".zip", ".jar"];

/// Nested containers deeper than this are stored verbatim.
pub const MAX_NESTING_DEPTH: usize = 16;

/// Returns true if an entry with this name may be expanded as a nested stream.
#[must_use]
pub fn is_nested_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    NESTED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Converts a zip container into a record stream.
///
/// # Errors
///
/// `Format` if the outer container cannot be read. A nested entry that is not
/// a readable container is stored as a plain record instead.
pub fn to_record_stream(container: &[u8]) -> Result<Vec<u8>> {
    let mut writer = RecordWriter::new(Vec::with_capacity(container.len()));
    encode_container(container, &mut writer)?;
    Ok(writer.into_inner())
}

/// Writes the header and records of a container to `writer`.
pub fn encode_container<W: Write>(container: &[u8], writer: &mut RecordWriter<W>) -> Result<()> {
    let entries = read_container(container)?;
    writer.write_header()?;
    encode_entries(entries, writer, 0)
}

fn encode_entries<W: Write>(
    entries: Vec<ContainerEntry>,
    writer: &mut RecordWriter<W>,
    depth: usize,
) -> Result<()> {
    for entry in entries {
        let record = record_for(&entry);
        match expandable(&entry, depth) {
            Some(inner) => {
                writer.begin_nested(&record)?;
                encode_entries(inner, writer, depth + 1)?;
            }
            None => writer.write_entry(&record, &entry.raw)?,
        }
    }
    writer.write_terminator()?;
    Ok(())
}

/// The inner entries of a nested container, if they lay out again into
/// exactly the entry's raw body.
fn expandable(entry: &ContainerEntry, depth: usize) -> Option<Vec<ContainerEntry>> {
    if depth >= MAX_NESTING_DEPTH || !is_nested_name(&entry.name) {
        return None;
    }
    let inner = match read_container(&entry.data) {
        Ok(inner) => inner,
        Err(err) => {
            debug!(entry = %entry.name, error = %err, "Nested entry is not a readable container, storing verbatim");
            return None;
        }
    };
    match nested_body(&inner, entry.method) {
        Ok(raw) if raw == entry.raw => Some(inner),
        Ok(_) => {
            debug!(entry = %entry.name, "Nested container does not lay out identically, storing verbatim");
            None
        }
        Err(err) => {
            debug!(entry = %entry.name, error = %err, "Nested container cannot be laid out, storing verbatim");
            None
        }
    }
}

/// The raw body of an entry holding `inner` as a nested container.
fn nested_body(inner: &[ContainerEntry], method: u16) -> Result<Vec<u8>, FormatError> {
    let container = write_container(inner)?;
    if method != METHOD_DEFLATED {
        return Ok(container);
    }
    deflate(&container, Compression::default())
        .map_err(|e| FormatError::Container(format!("deflating nested container: {e}")))
}

fn record_for(entry: &ContainerEntry) -> ArchiveRecord {
    ArchiveRecord {
        comment: entry.comment.clone(),
        compressed_size: i64::from(entry.compressed_size),
        crc: i64::from(entry.crc32),
        extra: entry.extra.clone(),
        method: i32::from(entry.method),
        size: i64::from(entry.size),
        dos_time: entry.dos_time,
        ..ArchiveRecord::new(entry.name.clone())
    }
}

/// Converts a record stream back into a zip container.
///
/// # Errors
///
/// `Format` on a bad header, truncated input, or a record whose body,
/// nested ones included, does not match its recorded sizes or CRC.
pub fn from_record_stream(stream: &[u8]) -> Result<Vec<u8>> {
    let mut reader = RecordReader::new(stream);
    reader.read_header()?;
    let entries = decode_entries(&mut reader, 0)?;
    Ok(write_container(&entries)?)
}

fn decode_entries(reader: &mut RecordReader<'_>, depth: usize) -> Result<Vec<ContainerEntry>> {
    if depth > MAX_NESTING_DEPTH {
        return Err(FormatError::Container(format!("record streams nested deeper than {MAX_NESTING_DEPTH}")).into());
    }
    let mut entries = Vec::new();
    loop {
        let record = reader.read_record()?;
        if record.terminator {
            return Ok(entries);
        }

        let method = recorded(&record, "method", i64::from(record.method))
            .and_then(|method| u16::try_from(method).map_err(|_| invalid(&record, "method")))?;
        let raw = if record.nested {
            nested_body(&decode_entries(reader, depth + 1)?, method)?
        } else {
            reader.read_body()?.to_vec()
        };
        if i64::try_from(raw.len()).ok() != Some(record.compressed_size) {
            return Err(FormatError::Container(format!(
                "compressed size mismatch for '{}': recorded {}, body {}",
                record.name,
                record.compressed_size,
                raw.len()
            ))
            .into());
        }

        let size = recorded(&record, "size", record.size)?;
        let crc = recorded(&record, "crc", record.crc)?;
        let mut entry = ContainerEntry::from_raw(record.name, method, raw, size, crc)?;
        entry.comment = record.comment;
        entry.extra = record.extra;
        entry.dos_time = record.dos_time;
        entries.push(entry);
    }
}

fn recorded(record: &ArchiveRecord, field: &str, value: i64) -> Result<u32, FormatError> {
    u32::try_from(value).map_err(|_| invalid(record, field))
}

fn invalid(record: &ArchiveRecord, field: &str) -> FormatError {
    FormatError::Container(format!("invalid {field} recorded for '{}'", record.name))
}
