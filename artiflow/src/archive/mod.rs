//! Archive normalization.
//!
//! Zip containers are converted into a flat, diff-friendly record stream and
//! back. Record bodies are the entries' raw bodies, so a container rebuilt
//! from its stream carries the same compressed bytes, sizes and checksums.
//! Nested containers stored in a way that can be laid out again exactly are
//! expanded into nested streams, so two versions of an archive that differ
//! in one inner entry produce streams that differ only around that entry.

pub mod codec;
pub mod container;
mod dos_time;
pub mod record;

pub use codec::{from_record_stream, to_record_stream};
pub use container::{read_container, write_container, ContainerEntry};
pub use dos_time::DosTime;
pub use record::{ArchiveRecord, RecordReader, RecordWriter};
