//! Zip containers with entry bodies kept as stored.
//!
//! Reading goes through the `zip` crate. Every entry keeps its raw body, the
//! still-compressed bytes for deflated entries, next to the inflated
//! content, so a container can be laid out again without recompressing
//! anything.
//!
//! [`write_container`] emits Zip32 only: local header and raw body per entry
//! in order, no data descriptors, then the central directory. Writing the
//! same entries twice yields identical bytes. The `zip` crate only copies
//! raw bodies out of an open archive, so entries rebuilt from a record
//! stream are laid out here.

use super::DosTime;
use crate::errors::FormatError;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::{Compression, Crc};
use std::io::{Cursor, Read, Write};
use zip::result::ZipError;
use zip::{CompressionMethod, ZipArchive};

const SIG_EOCD: u32 = 0x0605_4b50;
const SIG_CDFH: u32 = 0x0201_4b50;
const SIG_LFH: u32 = 0x0403_4b50;

const FLAG_UTF8: u16 = 0x0800;
const VERSION_NEEDED: u16 = 20;

/// Stored, no compression.
pub const METHOD_STORED: u16 = 0;
/// Deflate.
pub const METHOD_DEFLATED: u16 = 8;

/// One container entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    /// Entry name; directories end with `/`.
    pub name: String,
    /// Entry comment.
    pub comment: Option<String>,
    /// Extra field bytes from the central directory.
    pub extra: Option<Vec<u8>>,
    /// Compression method.
    pub method: u16,
    /// CRC-32 of the content.
    pub crc32: u32,
    /// Length of `raw`.
    pub compressed_size: u32,
    /// Length of `data`.
    pub size: u32,
    /// Last modification time.
    pub dos_time: DosTime,
    /// The body as stored in the container.
    pub raw: Vec<u8>,
    /// The inflated content.
    pub data: Vec<u8>,
}

impl ContainerEntry {
    /// Creates a stored entry.
    #[must_use]
    pub fn stored(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        Self::assemble(name.into(), METHOD_STORED, data.clone(), data)
    }

    /// Creates a deflated entry compressed at the default level.
    pub fn deflated(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Result<Self, FormatError> {
        Self::deflated_at(name, data, Compression::default())
    }

    /// Creates a deflated entry compressed at `level`.
    pub fn deflated_at(
        name: impl Into<String>,
        data: impl Into<Vec<u8>>,
        level: Compression,
    ) -> Result<Self, FormatError> {
        let (name, data) = (name.into(), data.into());
        let raw = deflate(&data, level).map_err(|e| malformed(&format!("deflating '{name}': {e}")))?;
        Ok(Self::assemble(name, METHOD_DEFLATED, raw, data))
    }

    /// Rebuilds an entry from a raw body and the metadata recorded for it.
    ///
    /// The body is inflated and checked against `size` and `crc32`.
    pub fn from_raw(
        name: impl Into<String>,
        method: u16,
        raw: Vec<u8>,
        size: u32,
        crc32: u32,
    ) -> Result<Self, FormatError> {
        let name = name.into();
        let data = match method {
            METHOD_STORED => raw.clone(),
            METHOD_DEFLATED => {
                let mut data = Vec::with_capacity(size as usize);
                DeflateDecoder::new(raw.as_slice())
                    .take(u64::from(size) + 1)
                    .read_to_end(&mut data)
                    .map_err(|e| malformed(&format!("inflating '{name}': {e}")))?;
                data
            }
            other => return Err(unsupported(&format!("compression method {other} for '{name}'"))),
        };
        let entry = Self::assemble(name, method, raw, data);
        if entry.size != size {
            return Err(malformed(&format!(
                "size mismatch for '{}': recorded {size}, content {}",
                entry.name, entry.size
            )));
        }
        if entry.crc32 != crc32 {
            return Err(malformed(&format!("CRC mismatch for '{}'", entry.name)));
        }
        Ok(entry)
    }

    fn assemble(name: String, method: u16, raw: Vec<u8>, data: Vec<u8>) -> Self {
        let mut crc = Crc::new();
        crc.update(&data);
        Self {
            name,
            comment: None,
            extra: None,
            method,
            crc32: crc.sum(),
            compressed_size: u32::try_from(raw.len()).unwrap_or(u32::MAX),
            size: u32::try_from(data.len()).unwrap_or(u32::MAX),
            dos_time: DosTime::MIN,
            raw,
            data,
        }
    }

    /// Sets the modification time.
    #[must_use]
    pub const fn with_time(mut self, dos_time: DosTime) -> Self {
        self.dos_time = dos_time;
        self
    }

    /// Sets the comment.
    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Sets the extra field.
    #[must_use]
    pub fn with_extra(mut self, extra: Vec<u8>) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Returns true for directory entries.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.name.ends_with('/')
    }
}

/// Reads every entry of a container.
///
/// # Errors
///
/// `FormatError::Container` for malformed, encrypted or Zip64 containers,
/// for methods other than stored and deflate, and on CRC mismatches.
pub fn read_container(bytes: &[u8]) -> Result<Vec<ContainerEntry>, FormatError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(zip_error)?;
    (0..archive.len())
        .map(|index| read_entry(&mut archive, index))
        .collect()
}

fn read_entry(
    archive: &mut ZipArchive<Cursor<&[u8]>>,
    index: usize,
) -> Result<ContainerEntry, FormatError> {
    let mut data = Vec::new();
    {
        let mut file = archive.by_index(index).map_err(zip_error)?;
        let name = file.name().to_string();
        file.read_to_end(&mut data)
            .map_err(|e| malformed(&format!("reading '{name}': {e}")))?;
    }

    let mut file = archive.by_index_raw(index).map_err(zip_error)?;
    let name = file.name().to_string();
    let method = match file.compression() {
        CompressionMethod::Stored => METHOD_STORED,
        CompressionMethod::Deflated => METHOD_DEFLATED,
        other => return Err(unsupported(&format!("compression method {other:?} for '{name}'"))),
    };
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)
        .map_err(|e| malformed(&format!("reading '{name}': {e}")))?;

    let comment = file.comment();
    Ok(ContainerEntry {
        comment: (!comment.is_empty()).then(|| comment.to_string()),
        extra: file.extra_data().filter(|extra| !extra.is_empty()).map(<[u8]>::to_vec),
        method,
        crc32: file.crc32(),
        compressed_size: zip32(file.compressed_size(), "compressed size")?,
        size: zip32(file.size(), "entry size")?,
        dos_time: file
            .last_modified()
            .map_or(DosTime::MIN, |time| DosTime::from_parts(time.datepart(), time.timepart())),
        raw,
        data,
        name,
    })
}

/// Lays entries out into a new container.
///
/// Raw bodies are written verbatim with the recorded CRC and sizes.
///
/// # Errors
///
/// `FormatError::Container` if the result would need Zip64.
pub fn write_container(entries: &[ContainerEntry]) -> Result<Vec<u8>, FormatError> {
    let count = len16(entries.len(), "entry count")?;
    if count == u16::MAX {
        return Err(unsupported("more than 65534 entries"));
    }

    let mut out = Vec::new();
    let mut central = Vec::new();
    for entry in entries {
        let offset = zip32(out.len() as u64, "archive offset")?;
        let name = entry.name.as_bytes();
        let extra = entry.extra.as_deref().unwrap_or_default();
        let comment = entry.comment.as_deref().unwrap_or_default().as_bytes();
        let flags = if entry.name.is_ascii() && comment.is_ascii() { 0 } else { FLAG_UTF8 };

        let common = CommonFields {
            flags,
            method: entry.method,
            dos_time: entry.dos_time,
            crc32: entry.crc32,
            compressed_size: zip32(entry.raw.len() as u64, "compressed size")?,
            size: entry.size,
            name_len: len16(name.len(), "name")?,
            extra_len: len16(extra.len(), "extra field")?,
        };

        put_u32(&mut out, SIG_LFH);
        put_u16(&mut out, VERSION_NEEDED);
        common.put(&mut out);
        out.extend_from_slice(name);
        out.extend_from_slice(extra);
        out.extend_from_slice(&entry.raw);

        put_u32(&mut central, SIG_CDFH);
        put_u16(&mut central, VERSION_NEEDED);
        put_u16(&mut central, VERSION_NEEDED);
        common.put(&mut central);
        put_u16(&mut central, len16(comment.len(), "comment")?);
        // disk number, internal and external attributes
        put_u16(&mut central, 0);
        put_u16(&mut central, 0);
        put_u32(&mut central, 0);
        put_u32(&mut central, offset);
        central.extend_from_slice(name);
        central.extend_from_slice(extra);
        central.extend_from_slice(comment);
    }

    let cd_off = zip32(out.len() as u64, "central directory offset")?;
    let cd_size = zip32(central.len() as u64, "central directory size")?;
    out.extend_from_slice(&central);
    put_u32(&mut out, SIG_EOCD);
    put_u16(&mut out, 0);
    put_u16(&mut out, 0);
    put_u16(&mut out, count);
    put_u16(&mut out, count);
    put_u32(&mut out, cd_size);
    put_u32(&mut out, cd_off);
    put_u16(&mut out, 0);
    Ok(out)
}

/// Deflates `data` at `level` with no zlib framing.
pub fn deflate(data: &[u8], level: Compression) -> std::io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), level);
    encoder.write_all(data)?;
    encoder.finish()
}

struct CommonFields {
    flags: u16,
    method: u16,
    dos_time: DosTime,
    crc32: u32,
    compressed_size: u32,
    size: u32,
    name_len: u16,
    extra_len: u16,
}

impl CommonFields {
    fn put(&self, out: &mut Vec<u8>) {
        put_u16(out, self.flags);
        put_u16(out, self.method);
        put_u16(out, self.dos_time.time_part());
        put_u16(out, self.dos_time.date_part());
        put_u32(out, self.crc32);
        put_u32(out, self.compressed_size);
        put_u32(out, self.size);
        put_u16(out, self.name_len);
        put_u16(out, self.extra_len);
    }
}

fn zip_error(err: ZipError) -> FormatError {
    match err {
        ZipError::UnsupportedArchive(feature) => unsupported(feature),
        other => malformed(&other.to_string()),
    }
}

fn malformed(message: &str) -> FormatError {
    FormatError::Container(format!("malformed zip: {message}"))
}

fn unsupported(feature: &str) -> FormatError {
    FormatError::Container(format!("unsupported zip feature: {feature}"))
}

fn zip32(value: u64, what: &str) -> Result<u32, FormatError> {
    u32::try_from(value)
        .ok()
        .filter(|&v| v != u32::MAX)
        .ok_or_else(|| unsupported(&format!("{what} of {value} needs Zip64")))
}

fn len16(value: usize, what: &str) -> Result<u16, FormatError> {
    u16::try_from(value).map_err(|_| unsupported(&format!("{what} longer than 65535")))
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::{foreign_jar, streamed_jar};
    use pretty_assertions::assert_eq;

    const LFH_LEN: usize = 30;

    fn sample() -> Vec<ContainerEntry> {
        vec![
            ContainerEntry::stored("META-INF/", Vec::new()),
            ContainerEntry::deflated("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\n".repeat(20))
                .unwrap()
                .with_time(DosTime::from_raw(0x5821_6a4e)),
            ContainerEntry::stored("data.bin", vec![0u8, 1, 2, 3, 255])
                .with_comment("raw bytes")
                .with_extra(vec![0xFE, 0xCA, 0, 0]),
            ContainerEntry::deflated_at("ünïcode.txt", b"hello".to_vec(), Compression::fast()).unwrap(),
        ]
    }

    #[test]
    fn test_write_then_read() {
        let bytes = write_container(&sample()).unwrap();
        let entries = read_container(&bytes).unwrap();

        assert_eq!(entries, sample());
        assert!(entries[0].is_dir());
        assert!(entries[1].compressed_size < entries[1].size);
    }

    #[test]
    fn test_writer_is_deterministic() {
        let first = write_container(&sample()).unwrap();
        let second = write_container(&read_container(&first).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_raw_bodies_are_not_recompressed() {
        let content = b"level one compresses differently".repeat(64);
        let fast = ContainerEntry::deflated_at("a.txt", content.clone(), Compression::fast()).unwrap();
        let best = ContainerEntry::deflated_at("a.txt", content, Compression::best()).unwrap();
        assert_ne!(fast.raw, best.raw);

        let read = read_container(&write_container(&[fast.clone()]).unwrap()).unwrap();
        assert_eq!(read[0].raw, fast.raw);
        assert_eq!(read[0].data, best.data);
    }

    #[test]
    fn test_reads_other_writers() {
        let entries = read_container(&foreign_jar(1, 1)).unwrap();
        let manifest = entries.iter().find(|e| e.name == "META-INF/MANIFEST.MF").unwrap();
        assert_eq!(manifest.method, METHOD_DEFLATED);
        assert_eq!(manifest.compressed_size as usize, manifest.raw.len());

        let streamed = read_container(&streamed_jar(&[("a.txt", b"alpha".as_slice())])).unwrap();
        assert_eq!(streamed[0].data, b"alpha");
        assert_eq!(streamed[0].size, 5);
    }

    #[test]
    fn test_from_raw_checks_metadata() {
        let entry = ContainerEntry::deflated("a.txt", b"abcdef".to_vec()).unwrap();
        let rebuilt =
            ContainerEntry::from_raw("a.txt", METHOD_DEFLATED, entry.raw.clone(), entry.size, entry.crc32)
                .unwrap();
        assert_eq!(rebuilt, entry);

        let err = ContainerEntry::from_raw("a.txt", METHOD_DEFLATED, entry.raw.clone(), entry.size, 7)
            .unwrap_err();
        assert!(err.to_string().contains("CRC mismatch"));
        let err = ContainerEntry::from_raw("a.txt", METHOD_STORED, b"abc".to_vec(), 4, entry.crc32)
            .unwrap_err();
        assert!(err.to_string().contains("size mismatch"));
    }

    #[test]
    fn test_empty_archive() {
        let bytes = write_container(&[]).unwrap();
        assert_eq!(bytes.len(), 22);
        assert!(read_container(&bytes).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(read_container(b"not a zip"), Err(FormatError::Container(_))));
        assert!(matches!(read_container(&[0u8; 64]), Err(FormatError::Container(_))));
    }

    #[test]
    fn test_detects_crc_corruption() {
        let mut bytes = write_container(&[ContainerEntry::stored("a.txt", b"abcdef".to_vec())]).unwrap();
        // first content byte follows the 30-byte header and 5-byte name
        bytes[LFH_LEN + 5] ^= 0xFF;
        assert!(matches!(read_container(&bytes), Err(FormatError::Container(_))));
    }

    #[test]
    fn test_rejects_unknown_method() {
        assert!(ContainerEntry::from_raw("a.txt", 12, b"x".to_vec(), 1, 0).is_err());
    }
}
