//! Patch generation and application stages.
//!
//! Both stages name a predecessor artifact in their data (its external key
//! form). They buffer their whole input, because block diffs are not
//! streamable, and do all the work at close: fetch the predecessor's
//! canonical bytes, optionally normalize archives through the record
//! stream codec, then diff or patch.

use super::Stage;
use crate::archive::{from_record_stream, to_record_stream};
use crate::core::{ArtifactDescriptor, ArtifactKey, Outcome, StageDescriptor};
use crate::delta;
use crate::errors::{ArtiflowError, Result};
use crate::repository::ArtifactRepository;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tracing::debug;

/// Default memory budget for patch stages.
pub const DEFAULT_PATCH_MEMORY: usize = 256 * 1024 * 1024;

/// How bytes are prepared before diffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchStrategy {
    /// Diff the bytes as they are.
    Raw,
    /// Normalize zip containers into record streams first.
    Archive,
}

impl PatchStrategy {
    /// Registry id of the generating stage.
    #[must_use]
    pub const fn generate_id(self) -> &'static str {
        match self {
            Self::Raw => "delta.bsdiff.generate",
            Self::Archive => "delta.bsdiff-zip.generate",
        }
    }

    /// Registry id of the applying stage.
    #[must_use]
    pub const fn apply_id(self) -> &'static str {
        match self {
            Self::Raw => "delta.bsdiff.apply",
            Self::Archive => "delta.bsdiff-zip.apply",
        }
    }

    /// Format tag of descriptors holding patches of this strategy.
    #[must_use]
    pub const fn format_id(self) -> &'static str {
        match self {
            Self::Raw => "bsdiff",
            Self::Archive => "bsdiff-zip",
        }
    }

    fn normalize(self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        match self {
            Self::Raw => Ok(bytes),
            Self::Archive => to_record_stream(&bytes),
        }
    }
}

impl fmt::Display for PatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.format_id())
    }
}

/// Memory bounds for patch stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchLimits {
    /// Upper bound for buffered input and for diff working memory.
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
}

fn default_max_buffer_bytes() -> usize {
    DEFAULT_PATCH_MEMORY
}

impl Default for PatchLimits {
    fn default() -> Self {
        Self {
            max_buffer_bytes: default_max_buffer_bytes(),
        }
    }
}

impl PatchLimits {
    /// Sets the memory bound.
    #[must_use]
    pub const fn with_max_buffer_bytes(mut self, max: usize) -> Self {
        self.max_buffer_bytes = max;
        self
    }
}

/// State shared by both patch stages.
struct PatchState {
    strategy: PatchStrategy,
    repository: Arc<dyn ArtifactRepository>,
    limits: PatchLimits,
    predecessor: Option<ArtifactKey>,
    buffer: Vec<u8>,
}

impl PatchState {
    fn new(
        strategy: PatchStrategy,
        repository: Arc<dyn ArtifactRepository>,
        limits: PatchLimits,
    ) -> Self {
        Self {
            strategy,
            repository,
            limits,
            predecessor: None,
            buffer: Vec::new(),
        }
    }

    fn initialize(&mut self, id: &str, descriptor: &StageDescriptor) -> Outcome {
        let Some(data) = descriptor.data() else {
            return Outcome::config_problem(descriptor.required, format!("{id}: missing predecessor"));
        };
        match ArtifactKey::parse(data) {
            Ok(key) => {
                debug!(processor_id = id, predecessor = %key, "Patch stage configured");
                self.predecessor = Some(key);
                Outcome::ok()
            }
            Err(err) => Outcome::config_problem(
                descriptor.required,
                format!("{id}: invalid predecessor"),
            )
            .with_cause(err),
        }
    }

    fn append(&mut self, buf: &[u8]) -> Result<()> {
        let needed = self.buffer.len().saturating_add(buf.len());
        if needed > self.limits.max_buffer_bytes {
            return Err(ArtiflowError::exhausted(format!(
                "patch input of {needed} bytes exceeds limit {}",
                self.limits.max_buffer_bytes
            )));
        }
        self.buffer.try_reserve(buf.len()).map_err(|e| {
            ArtiflowError::exhausted(format!("cannot buffer {needed} bytes of patch input: {e}"))
        })?;
        self.buffer.extend_from_slice(buf);
        Ok(())
    }

    /// Takes the buffered input and the predecessor's normalized bytes.
    fn take_inputs(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let Some(predecessor) = self.predecessor.take() else {
            return Ok(None);
        };
        let input = std::mem::take(&mut self.buffer);
        let base = self.repository.fetch_canonical(&predecessor)?;
        Ok(Some((self.strategy.normalize(base)?, input)))
    }
}

impl fmt::Debug for PatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchState")
            .field("strategy", &self.strategy)
            .field("limits", &self.limits)
            .field("predecessor", &self.predecessor)
            .field("buffered", &self.buffer.len())
            .finish_non_exhaustive()
    }
}

/// Replaces its input with a patch against the predecessor.
#[derive(Debug)]
pub struct PatchGenerateStage {
    state: PatchState,
}

impl PatchGenerateStage {
    /// Creates an unconfigured stage.
    #[must_use]
    pub fn new(
        strategy: PatchStrategy,
        repository: Arc<dyn ArtifactRepository>,
        limits: PatchLimits,
    ) -> Self {
        Self {
            state: PatchState::new(strategy, repository, limits),
        }
    }
}

impl Stage for PatchGenerateStage {
    fn initialize(&mut self, descriptor: &StageDescriptor, _context: &ArtifactDescriptor) -> Outcome {
        self.state.initialize(self.state.strategy.generate_id(), descriptor)
    }

    fn is_enabled(&self) -> bool {
        self.state.predecessor.is_some()
    }

    fn write(&mut self, buf: &[u8], _next: &mut dyn Write) -> Result<()> {
        self.state.append(buf)
    }

    fn close(&mut self, next: &mut dyn Write) -> Result<Outcome> {
        let Some((base, input)) = self.state.take_inputs()? else {
            return Ok(Outcome::ok());
        };
        let target = self.state.strategy.normalize(input)?;
        let patch = delta::diff(&base, &target, self.state.limits.max_buffer_bytes)?;
        debug!(
            processor_id = self.state.strategy.generate_id(),
            base = base.len(),
            target = target.len(),
            patch = patch.len(),
            "Patch generated"
        );
        next.write_all(&patch)?;
        Ok(Outcome::ok())
    }
}

/// Rebuilds an artifact from a patch against the predecessor.
#[derive(Debug)]
pub struct PatchApplyStage {
    state: PatchState,
}

impl PatchApplyStage {
    /// Creates an unconfigured stage.
    #[must_use]
    pub fn new(
        strategy: PatchStrategy,
        repository: Arc<dyn ArtifactRepository>,
        limits: PatchLimits,
    ) -> Self {
        Self {
            state: PatchState::new(strategy, repository, limits),
        }
    }
}

impl Stage for PatchApplyStage {
    fn initialize(&mut self, descriptor: &StageDescriptor, _context: &ArtifactDescriptor) -> Outcome {
        self.state.initialize(self.state.strategy.apply_id(), descriptor)
    }

    fn is_enabled(&self) -> bool {
        self.state.predecessor.is_some()
    }

    fn write(&mut self, buf: &[u8], _next: &mut dyn Write) -> Result<()> {
        self.state.append(buf)
    }

    fn close(&mut self, next: &mut dyn Write) -> Result<Outcome> {
        let Some((base, patch)) = self.state.take_inputs()? else {
            return Ok(Outcome::ok());
        };
        let rebuilt = delta::patch(&base, &patch, self.state.limits.max_buffer_bytes)?;
        let output = match self.state.strategy {
            PatchStrategy::Raw => rebuilt,
            PatchStrategy::Archive => from_record_stream(&rebuilt)?,
        };
        debug!(
            processor_id = self.state.strategy.apply_id(),
            output = output.len(),
            "Patch applied"
        );
        next.write_all(&output)?;
        Ok(Outcome::ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Severity, Version};
    use crate::repository::{InMemoryRepository, MockArtifactRepository};
    use crate::testing::fixtures::sample_jar_version;
    use pretty_assertions::assert_eq;

    fn key(version: u32) -> ArtifactKey {
        ArtifactKey::new("ns", "osgi.bundle", "org.example", Version::new(version, 0, 0))
    }

    fn context(version: u32) -> ArtifactDescriptor {
        ArtifactDescriptor::new(key(version))
    }

    fn run(stage: &mut dyn Stage, input: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        stage.write(input, &mut out)?;
        let status = stage.close(&mut out)?;
        assert!(status.is_ok(), "unexpected status {status}");
        Ok(out)
    }

    fn configured<S: Stage>(mut stage: S, id: &str, predecessor: &ArtifactKey) -> S {
        let status = stage.initialize(
            &StageDescriptor::new(id).with_data(predecessor.to_external_form()).required(),
            &context(2),
        );
        assert!(status.is_ok(), "unexpected status {status}");
        stage
    }

    fn round_trip(strategy: PatchStrategy, old: Vec<u8>, new: &[u8]) {
        let repo = InMemoryRepository::new();
        repo.add_canonical(key(1), old);
        let repo: Arc<dyn ArtifactRepository> = Arc::new(repo);

        let mut generate = configured(
            PatchGenerateStage::new(strategy, Arc::clone(&repo), PatchLimits::default()),
            strategy.generate_id(),
            &key(1),
        );
        let patch = run(&mut generate, new).unwrap();

        let mut apply = configured(
            PatchApplyStage::new(strategy, repo, PatchLimits::default()),
            strategy.apply_id(),
            &key(1),
        );
        assert_eq!(run(&mut apply, &patch).unwrap(), new);
    }

    #[test]
    fn test_raw_round_trip() {
        round_trip(PatchStrategy::Raw, b"version one of the tool".to_vec(), b"version two of the tool!");
    }

    #[test]
    fn test_archive_round_trip() {
        round_trip(PatchStrategy::Archive, sample_jar_version(1), &sample_jar_version(2));
    }

    #[test]
    fn test_invalid_predecessor_is_config_problem() {
        let repo: Arc<dyn ArtifactRepository> = Arc::new(InMemoryRepository::new());
        let mut stage = PatchGenerateStage::new(PatchStrategy::Raw, repo, PatchLimits::default());

        let status = stage.initialize(
            &StageDescriptor::new("delta.bsdiff.generate")
                .with_data("ns,osgi.bundle,too-few")
                .required(),
            &context(2),
        );
        assert_eq!(status.severity, Severity::Error);
        assert!(status.cause.unwrap().contains("too-few"));
        assert!(!stage.is_enabled());
    }

    #[test]
    fn test_buffer_limit_is_resource_exhaustion() {
        let repo: Arc<dyn ArtifactRepository> = Arc::new(InMemoryRepository::new());
        let mut stage = configured(
            PatchGenerateStage::new(
                PatchStrategy::Raw,
                repo,
                PatchLimits::default().with_max_buffer_bytes(8),
            ),
            "delta.bsdiff.generate",
            &key(1),
        );

        let mut out = Vec::new();
        stage.write(b"12345", &mut out).unwrap();
        let err = stage.write(b"67890", &mut out).unwrap_err();
        assert!(err.is_resource_exhausted());
    }

    #[test]
    fn test_fetch_failure_is_hard_error() {
        let mut mock = MockArtifactRepository::new();
        mock.expect_fetch_canonical()
            .returning(|key| Err(ArtiflowError::repository(key, "offline")));
        let repo: Arc<dyn ArtifactRepository> = Arc::new(mock);

        let mut stage = configured(
            PatchGenerateStage::new(PatchStrategy::Raw, repo, PatchLimits::default()),
            "delta.bsdiff.generate",
            &key(1),
        );
        let mut out = Vec::new();
        stage.write(b"data", &mut out).unwrap();
        assert!(matches!(stage.close(&mut out), Err(ArtiflowError::Repository { .. })));
        assert!(out.is_empty());
    }

    #[test]
    fn test_strategy_ids() {
        assert_eq!(PatchStrategy::Archive.format_id(), "bsdiff-zip");
        assert_eq!(PatchStrategy::Raw.apply_id(), "delta.bsdiff.apply");
        assert_eq!(PatchStrategy::Archive.to_string(), "bsdiff-zip");
    }
}
