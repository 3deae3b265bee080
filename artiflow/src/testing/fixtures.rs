//! Container fixtures.
//!
//! [`sample_jar_version`] and [`jar_with_nested`] are laid out by
//! [`write_container`], so a parsed fixture lays out again into identical
//! bytes. [`foreign_jar`] comes from `zip::ZipWriter` and [`streamed_jar`]
//! uses data descriptors; neither layout is the one `write_container` emits.

use crate::archive::container::deflate;
use crate::archive::{write_container, ContainerEntry, DosTime};
use flate2::{Compression, Crc};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const FIXTURE_TIME: DosTime = DosTime::from_raw(0x5821_6a4e);

fn build(entries: &[ContainerEntry]) -> Vec<u8> {
    write_container(entries).unwrap_or_else(|err| panic!("fixture container failed to encode: {err}"))
}

fn deflated(name: &str, data: impl Into<Vec<u8>>) -> ContainerEntry {
    ContainerEntry::deflated(name, data)
        .unwrap_or_else(|err| panic!("fixture entry failed to deflate: {err}"))
        .with_time(FIXTURE_TIME)
}

fn manifest(version: u32) -> String {
    format!(
        "Manifest-Version: 1.0\nBundle-SymbolicName: org.example\nBundle-Version: {version}.0.0\n"
    )
}

fn class_body(version: u32) -> Vec<u8> {
    (0..2048u32)
        .map(|i| u8::try_from((i * 31 + version * (i % 7)) % 251).unwrap_or_default())
        .collect()
}

fn notes(version: u32) -> String {
    "release notes\n".repeat(20 + version as usize)
}

/// A small jar with a directory, a manifest, a stored entry and a deflated
/// class file.
#[must_use]
pub fn sample_jar() -> Vec<u8> {
    sample_jar_version(1)
}

/// A jar whose content drifts slightly from one version to the next.
///
/// Most entries are shared across versions, which is what makes patches
/// between neighbouring versions small.
#[must_use]
pub fn sample_jar_version(version: u32) -> Vec<u8> {
    build(&[
        ContainerEntry::stored("META-INF/", Vec::new()).with_time(FIXTURE_TIME),
        deflated("META-INF/MANIFEST.MF", manifest(version)),
        ContainerEntry::stored("about.txt", b"Example bundle".to_vec())
            .with_time(FIXTURE_TIME)
            .with_comment("about"),
        deflated("org/example/Main.class", class_body(version)),
        deflated("notes.txt", notes(version)),
    ])
}

/// A jar that nests `depth` levels of inner jars.
///
/// The outer jar holds `lib/level1.jar`, which holds `lib/level2.jar`, and
/// so on. The innermost jar is [`sample_jar`].
#[must_use]
pub fn jar_with_nested(depth: usize) -> Vec<u8> {
    let mut inner = sample_jar();
    for level in (1..=depth).rev() {
        inner = build(&[
            deflated("META-INF/MANIFEST.MF", manifest(1)),
            ContainerEntry::stored(format!("lib/level{level}.jar"), inner).with_time(FIXTURE_TIME),
        ]);
    }
    inner
}

fn zip_writer_jar(files: &[(&str, &[u8], CompressionMethod)], level: i64) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    writer
        .add_directory("META-INF/", SimpleFileOptions::default())
        .unwrap_or_else(|err| panic!("fixture directory failed: {err}"));
    for (name, content, method) in files {
        let options = SimpleFileOptions::default().compression_method(*method);
        let options = if *method == CompressionMethod::Deflated {
            options.compression_level(Some(level))
        } else {
            options
        };
        writer
            .start_file(*name, options)
            .unwrap_or_else(|err| panic!("fixture entry '{name}' failed: {err}"));
        writer
            .write_all(content)
            .unwrap_or_else(|err| panic!("fixture entry '{name}' failed: {err}"));
    }
    writer
        .finish()
        .unwrap_or_else(|err| panic!("fixture jar failed to finish: {err}"))
        .into_inner()
}

/// A bundle written by `zip::ZipWriter` at deflate `level`, holding a
/// nested jar from the same writer.
#[must_use]
pub fn foreign_jar(version: u32, level: i64) -> Vec<u8> {
    let helper: Vec<u8> = (0..1024u32).map(|i| u8::try_from(i % 97).unwrap_or_default()).collect();
    let util_files = [
        ("util/Helper.class", helper.as_slice(), CompressionMethod::Deflated),
        ("util/README", b"helpers".as_slice(), CompressionMethod::Stored),
    ];
    let util = zip_writer_jar(&util_files, level);

    let (manifest, class_body, notes) = (manifest(version), class_body(version), notes(version));
    let files = [
        ("META-INF/MANIFEST.MF", manifest.as_bytes(), CompressionMethod::Deflated),
        ("org/example/Main.class", class_body.as_slice(), CompressionMethod::Deflated),
        ("lib/util.jar", util.as_slice(), CompressionMethod::Stored),
        ("notes.txt", notes.as_bytes(), CompressionMethod::Deflated),
    ];
    zip_writer_jar(&files, level)
}

/// A jar whose entries are deflated at the best level and followed by data
/// descriptors, with sizes and CRC zeroed in the local headers.
#[must_use]
pub fn streamed_jar(files: &[(&str, &[u8])]) -> Vec<u8> {
    const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
    fn put(out: &mut Vec<u8>, bytes: &[u8]) {
        out.extend_from_slice(bytes);
    }

    let mut out = Vec::new();
    let mut central = Vec::new();
    for (name, content) in files {
        let offset = u32::try_from(out.len()).unwrap_or(u32::MAX);
        let body = deflate(content, Compression::best())
            .unwrap_or_else(|err| panic!("fixture entry '{name}' failed to deflate: {err}"));
        let mut crc = Crc::new();
        crc.update(content);
        let crc = crc.sum();
        let compressed = u32::try_from(body.len()).unwrap_or(u32::MAX);
        let size = u32::try_from(content.len()).unwrap_or(u32::MAX);
        let name_len = u16::try_from(name.len()).unwrap_or(u16::MAX);

        put(&mut out, &0x0403_4b50u32.to_le_bytes());
        put(&mut out, &20u16.to_le_bytes());
        put(&mut out, &FLAG_DATA_DESCRIPTOR.to_le_bytes());
        put(&mut out, &8u16.to_le_bytes());
        put(&mut out, &FIXTURE_TIME.time_part().to_le_bytes());
        put(&mut out, &FIXTURE_TIME.date_part().to_le_bytes());
        put(&mut out, &[0; 12]);
        put(&mut out, &name_len.to_le_bytes());
        put(&mut out, &0u16.to_le_bytes());
        put(&mut out, name.as_bytes());
        put(&mut out, &body);
        put(&mut out, &0x0807_4b50u32.to_le_bytes());
        put(&mut out, &crc.to_le_bytes());
        put(&mut out, &compressed.to_le_bytes());
        put(&mut out, &size.to_le_bytes());

        put(&mut central, &0x0201_4b50u32.to_le_bytes());
        // made by unix, version 2.0
        put(&mut central, &0x0314u16.to_le_bytes());
        put(&mut central, &20u16.to_le_bytes());
        put(&mut central, &FLAG_DATA_DESCRIPTOR.to_le_bytes());
        put(&mut central, &8u16.to_le_bytes());
        put(&mut central, &FIXTURE_TIME.time_part().to_le_bytes());
        put(&mut central, &FIXTURE_TIME.date_part().to_le_bytes());
        put(&mut central, &crc.to_le_bytes());
        put(&mut central, &compressed.to_le_bytes());
        put(&mut central, &size.to_le_bytes());
        put(&mut central, &name_len.to_le_bytes());
        put(&mut central, &[0; 8]);
        put(&mut central, &(0o100_644u32 << 16).to_le_bytes());
        put(&mut central, &offset.to_le_bytes());
        put(&mut central, name.as_bytes());
    }

    let count = u16::try_from(files.len()).unwrap_or(u16::MAX);
    let cd_offset = u32::try_from(out.len()).unwrap_or(u32::MAX);
    let cd_size = u32::try_from(central.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&central);
    put(&mut out, &0x0605_4b50u32.to_le_bytes());
    put(&mut out, &[0; 4]);
    put(&mut out, &count.to_le_bytes());
    put(&mut out, &count.to_le_bytes());
    put(&mut out, &cd_size.to_le_bytes());
    put(&mut out, &cd_offset.to_le_bytes());
    put(&mut out, &0u16.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::read_container;

    #[test]
    fn test_sample_versions_differ() {
        assert_ne!(sample_jar_version(1), sample_jar_version(2));
        assert_eq!(sample_jar(), sample_jar_version(1));
    }

    #[test]
    fn test_nested_depth() {
        let outer = read_container(&jar_with_nested(2)).unwrap();
        let level1 = outer.iter().find(|e| e.name == "lib/level1.jar").unwrap();
        let inner = read_container(&level1.data).unwrap();
        assert!(inner.iter().any(|e| e.name == "lib/level2.jar"));
    }

    #[test]
    fn test_foreign_jar_is_not_laid_out_like_write_container() {
        let original = foreign_jar(1, 1);
        let entries = read_container(&original).unwrap();
        assert_ne!(write_container(&entries).unwrap(), original);

        let util = entries.iter().find(|e| e.name == "lib/util.jar").unwrap();
        assert_eq!(read_container(&util.data).unwrap().len(), 3);
    }

    #[test]
    fn test_streamed_jar_reads_back() {
        let entries = read_container(&streamed_jar(&[("a.txt", b"alpha".as_slice())])).unwrap();
        assert_eq!(entries[0].name, "a.txt");
        assert_eq!(entries[0].data, b"alpha");
        assert_eq!(entries[0].dos_time, FIXTURE_TIME);
    }
}
