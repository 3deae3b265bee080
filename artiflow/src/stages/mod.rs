//! Stage trait and implementations.
//!
//! Stages are the units of a processing chain. Each stage is bound to one
//! [`StageDescriptor`] and one artifact context, receives bytes from its
//! predecessor and pushes its output into the next writer in the chain.
//!
//! Lifecycle: `initialize` once, any number of `write`/`flush` calls, then
//! `close` once. Configuration problems never fail `initialize`; they are
//! reported in the returned [`Outcome`] and usually leave the stage
//! disabled.

pub mod arithmetic;
pub mod counter;
pub mod decompress;
pub mod delta;
pub mod verify;

use crate::core::{ArtifactDescriptor, Outcome, StageDescriptor};
use crate::errors::Result;
use std::fmt::Debug;
use std::io::Write;

pub use arithmetic::{ArithmeticOp, ArithmeticStage};
pub use counter::SizeCounter;
pub use decompress::GzipDecodeStage;
pub use delta::{PatchApplyStage, PatchGenerateStage, PatchLimits, PatchStrategy};
pub use verify::{DigestAlgorithm, DigestVerifier};

/// Trait for processing stages.
///
/// `next` is the rest of the chain: the following stage, or the terminal
/// sink when this stage is last.
pub trait Stage: Send + Debug {
    /// Reads the stage configuration and the artifact context.
    ///
    /// Returns the initial status. A stage that could not be configured
    /// reports a config problem here and returns `false` from
    /// [`Stage::is_enabled`].
    fn initialize(&mut self, descriptor: &StageDescriptor, context: &ArtifactDescriptor)
        -> Outcome;

    /// Returns false if the stage must be bypassed.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Processes a block of bytes and forwards the result.
    fn write(&mut self, buf: &[u8], next: &mut dyn Write) -> Result<()>;

    /// Forwards a flush.
    fn flush(&mut self, next: &mut dyn Write) -> Result<()> {
        next.flush()?;
        Ok(())
    }

    /// Finalizes the stage and returns its terminal status.
    ///
    /// Any output still held by the stage is written to `next` before
    /// returning.
    fn close(&mut self, next: &mut dyn Write) -> Result<Outcome>;
}

/// Placeholder for a processor id the registry could not resolve.
///
/// Always disabled; passes bytes through untouched if it is ever written to.
#[derive(Debug, Clone)]
pub struct UnresolvedStage {
    processor_id: String,
}

impl UnresolvedStage {
    /// Creates a placeholder for the given processor id.
    #[must_use]
    pub fn new(processor_id: impl Into<String>) -> Self {
        Self {
            processor_id: processor_id.into(),
        }
    }

    /// The id that failed to resolve.
    #[must_use]
    pub fn processor_id(&self) -> &str {
        &self.processor_id
    }
}

impl Stage for UnresolvedStage {
    fn initialize(&mut self, descriptor: &StageDescriptor, _context: &ArtifactDescriptor) -> Outcome {
        Outcome::config_problem(
            descriptor.required,
            format!("No processor registered for '{}'", self.processor_id),
        )
    }

    fn is_enabled(&self) -> bool {
        false
    }

    fn write(&mut self, buf: &[u8], next: &mut dyn Write) -> Result<()> {
        next.write_all(buf)?;
        Ok(())
    }

    fn close(&mut self, _next: &mut dyn Write) -> Result<Outcome> {
        Ok(Outcome::ok())
    }
}

/// Resolves an expected value from stage data.
///
/// `download` and `artifact` are indirections through the context
/// properties named by `download_property` and `artifact_property`; any other
/// value is taken literally.
pub(crate) fn resolve_expected(
    data: Option<&str>,
    context: &ArtifactDescriptor,
    download_property: &str,
    artifact_property: &str,
) -> Option<String> {
    match data? {
        "download" => context.property(download_property).map(str::to_string),
        "artifact" => context.property(artifact_property).map(str::to_string),
        literal => Some(literal.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{properties, ArtifactKey, Severity, Version};

    fn context() -> ArtifactDescriptor {
        ArtifactDescriptor::new(ArtifactKey::new("ns", "binary", "tool", Version::new(1, 0, 0)))
            .with_property(properties::DOWNLOAD_SIZE, "10")
            .with_property(properties::ARTIFACT_SIZE, "20")
    }

    #[test]
    fn test_unresolved_stage_is_disabled() {
        let mut stage = UnresolvedStage::new("no.such.stage");
        let required = stage.initialize(&StageDescriptor::new("no.such.stage").required(), &context());
        let optional = stage.initialize(&StageDescriptor::new("no.such.stage"), &context());

        assert!(!stage.is_enabled());
        assert_eq!(required.severity, Severity::Error);
        assert_eq!(optional.severity, Severity::Info);
        assert!(required.message.contains("no.such.stage"));
    }

    #[test]
    fn test_unresolved_stage_passes_through() {
        let mut stage = UnresolvedStage::new("x");
        let mut out = Vec::new();
        stage.write(b"abc", &mut out).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_resolve_expected() {
        let ctx = context();
        let resolve = |data| {
            resolve_expected(data, &ctx, properties::DOWNLOAD_SIZE, properties::ARTIFACT_SIZE)
        };

        assert_eq!(resolve(Some("download")).as_deref(), Some("10"));
        assert_eq!(resolve(Some("artifact")).as_deref(), Some("20"));
        assert_eq!(resolve(Some("42")).as_deref(), Some("42"));
        assert_eq!(resolve(None), None);
    }
}
