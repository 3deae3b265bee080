//! In-memory repository.

use super::{ArtifactQuery, ArtifactRepository, ArtifactSink};
use crate::core::{properties, ArtifactDescriptor, ArtifactKey};
use crate::errors::{ArtiflowError, Result};
use crate::stages::{DigestAlgorithm, DigestVerifier};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::debug;

type Store = BTreeMap<ArtifactKey, Vec<(ArtifactDescriptor, Vec<u8>)>>;

/// A repository kept entirely in memory.
///
/// Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRepository {
    artifacts: Arc<RwLock<Store>>,
    read_only: bool,
}

impl InMemoryRepository {
    /// Creates an empty writable repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `open_sink` fail, for exercising write failures.
    #[must_use]
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Stores canonical bytes and returns the descriptor created for them.
    ///
    /// Size and MD5 properties are filled in from the content.
    pub fn add_canonical(&self, key: ArtifactKey, bytes: Vec<u8>) -> ArtifactDescriptor {
        let size = bytes.len().to_string();
        let md5 = DigestVerifier::digest_hex(DigestAlgorithm::Md5, &bytes);
        let descriptor = ArtifactDescriptor::new(key)
            .with_property(properties::ARTIFACT_SIZE, size.clone())
            .with_property(properties::DOWNLOAD_SIZE, size)
            .with_property(properties::ARTIFACT_MD5, md5.clone())
            .with_property(properties::DOWNLOAD_MD5, md5);
        self.add_descriptor(descriptor.clone(), bytes);
        descriptor
    }

    /// Stores bytes under an arbitrary descriptor, replacing an identical
    /// descriptor if present.
    pub fn add_descriptor(&self, descriptor: ArtifactDescriptor, bytes: Vec<u8>) {
        let mut artifacts = self.artifacts.write();
        let entries = artifacts.entry(descriptor.key.clone()).or_default();
        entries.retain(|(existing, _)| *existing != descriptor);
        entries.push((descriptor, bytes));
    }

    /// Returns the stored bytes of a descriptor.
    #[must_use]
    pub fn raw_bytes(&self, descriptor: &ArtifactDescriptor) -> Option<Vec<u8>> {
        self.artifacts
            .read()
            .get(&descriptor.key)?
            .iter()
            .find(|(existing, _)| existing == descriptor)
            .map(|(_, bytes)| bytes.clone())
    }

    /// Number of stored descriptors across all artifacts.
    #[must_use]
    pub fn descriptor_count(&self) -> usize {
        self.artifacts.read().values().map(Vec::len).sum()
    }
}

impl ArtifactRepository for InMemoryRepository {
    fn query(&self, query: &ArtifactQuery) -> Vec<ArtifactKey> {
        self.artifacts
            .read()
            .keys()
            .filter(|key| query.matches(key))
            .cloned()
            .collect()
    }

    fn descriptors(&self, key: &ArtifactKey) -> Vec<ArtifactDescriptor> {
        self.artifacts
            .read()
            .get(key)
            .map(|entries| entries.iter().map(|(d, _)| d.clone()).collect())
            .unwrap_or_default()
    }

    fn fetch_canonical(&self, key: &ArtifactKey) -> Result<Vec<u8>> {
        self.artifacts
            .read()
            .get(key)
            .and_then(|entries| entries.iter().find(|(d, _)| d.is_canonical()))
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| ArtiflowError::repository(key, "no canonical descriptor"))
    }

    fn open_sink(&self, descriptor: &ArtifactDescriptor) -> Result<Box<dyn ArtifactSink>> {
        if self.read_only {
            return Err(ArtiflowError::repository(&descriptor.key, "repository is read-only"));
        }
        Ok(Box::new(MemorySink {
            descriptor: descriptor.clone(),
            buffer: Vec::new(),
            repository: self.clone(),
        }))
    }
}

struct MemorySink {
    descriptor: ArtifactDescriptor,
    buffer: Vec<u8>,
    repository: InMemoryRepository,
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ArtifactSink for MemorySink {
    fn commit(self: Box<Self>) -> Result<()> {
        let MemorySink {
            descriptor,
            buffer,
            repository,
        } = *self;
        debug!(key = %descriptor.key, bytes = buffer.len(), "Committing artifact");
        repository.add_descriptor(descriptor, buffer);
        Ok(())
    }
}
