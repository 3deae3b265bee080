//! Repository collaborator interfaces.
//!
//! The processing core only needs four things from a repository: list
//! artifact keys, list the descriptors of one artifact, fetch canonical
//! bytes, and open a sink for a new descriptor.

mod memory;

pub use memory::InMemoryRepository;

use crate::core::{ArtifactDescriptor, ArtifactKey};
use crate::errors::Result;
use std::io::Write;

/// A writable destination for a new artifact representation.
///
/// Bytes become visible in the repository only after `commit`. Dropping a
/// sink without committing discards it.
pub trait ArtifactSink: Write + Send {
    /// Stores the written bytes under the sink's descriptor.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Selects artifact keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactQuery {
    /// Only keys with this classifier.
    pub classifier: Option<String>,
    /// Only keys with this id.
    pub id: Option<String>,
}

impl ArtifactQuery {
    /// Matches every key.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts the query to one classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    /// Restricts the query to one id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Returns true if `key` satisfies the query.
    #[must_use]
    pub fn matches(&self, key: &ArtifactKey) -> bool {
        self.classifier.as_ref().map_or(true, |c| *c == key.classifier)
            && self.id.as_ref().map_or(true, |id| *id == key.id)
    }
}

/// The repository surface used by patch stages and the optimizer.
#[cfg_attr(test, mockall::automock)]
pub trait ArtifactRepository: Send + Sync {
    /// Returns every key matching the query, in key order.
    fn query(&self, query: &ArtifactQuery) -> Vec<ArtifactKey>;

    /// Returns every stored descriptor of an artifact.
    fn descriptors(&self, key: &ArtifactKey) -> Vec<ArtifactDescriptor>;

    /// Returns the bytes of the artifact's canonical descriptor.
    fn fetch_canonical(&self, key: &ArtifactKey) -> Result<Vec<u8>>;

    /// Opens a sink that stores a new representation under `descriptor`.
    fn open_sink(&self, descriptor: &ArtifactDescriptor) -> Result<Box<dyn ArtifactSink>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Version;

    #[test]
    fn test_query_matching() {
        let key = ArtifactKey::new("ns", "osgi.bundle", "org.example", Version::new(1, 0, 0));

        assert!(ArtifactQuery::all().matches(&key));
        assert!(ArtifactQuery::all().with_classifier("osgi.bundle").matches(&key));
        assert!(ArtifactQuery::all().with_id("org.example").matches(&key));
        assert!(!ArtifactQuery::all().with_classifier("binary").matches(&key));
        assert!(!ArtifactQuery::all()
            .with_classifier("osgi.bundle")
            .with_id("other")
            .matches(&key));
    }
}
