//! Byte counting.

use super::{resolve_expected, Stage};
use crate::core::{properties, ArtifactDescriptor, Outcome, StageDescriptor};
use crate::errors::Result;
use std::io::Write;
use tracing::{debug, warn};

/// Registry id of the size counter.
pub const SIZE_COUNTER_ID: &str = "count.size";

/// Counts the bytes passing through and compares the total at close.
///
/// A size mismatch is only a warning: the bytes may still be usable.
#[derive(Debug, Default)]
pub struct SizeCounter {
    expected: Option<u64>,
    count: u64,
}

impl SizeCounter {
    /// Creates an unconfigured counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes seen so far.
    #[must_use]
    pub const fn count(&self) -> u64 {
        self.count
    }
}

impl Stage for SizeCounter {
    fn initialize(&mut self, descriptor: &StageDescriptor, context: &ArtifactDescriptor) -> Outcome {
        let resolved = resolve_expected(
            descriptor.data(),
            context,
            properties::DOWNLOAD_SIZE,
            properties::ARTIFACT_SIZE,
        );
        let Some(raw) = resolved else {
            return Outcome::config_problem(
                descriptor.required,
                format!("{SIZE_COUNTER_ID}: no expected size available for {}", context.key),
            );
        };
        match raw.trim().parse::<u64>() {
            Ok(size) => {
                debug!(processor_id = SIZE_COUNTER_ID, expected = size, "Size counter configured");
                self.expected = Some(size);
                Outcome::ok()
            }
            Err(_) => Outcome::config_problem(
                descriptor.required,
                format!("{SIZE_COUNTER_ID}: '{raw}' is not a size"),
            ),
        }
    }

    fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    fn write(&mut self, buf: &[u8], next: &mut dyn Write) -> Result<()> {
        self.count += buf.len() as u64;
        next.write_all(buf)?;
        Ok(())
    }

    fn close(&mut self, _next: &mut dyn Write) -> Result<Outcome> {
        match self.expected {
            Some(expected) if expected != self.count => {
                warn!(processor_id = SIZE_COUNTER_ID, expected, actual = self.count, "Size mismatch");
                Ok(Outcome::warning(format!(
                    "Size mismatch: expected {expected} bytes, counted {}",
                    self.count
                )))
            }
            _ => Ok(Outcome::ok()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactKey, Severity, Version};

    fn context() -> ArtifactDescriptor {
        ArtifactDescriptor::new(ArtifactKey::new("ns", "binary", "tool", Version::new(1, 0, 0)))
            .with_property(properties::ARTIFACT_SIZE, "4")
    }

    #[test]
    fn test_matching_size() {
        let mut counter = SizeCounter::new();
        assert!(counter
            .initialize(&StageDescriptor::new(SIZE_COUNTER_ID).with_data("artifact"), &context())
            .is_ok());

        let mut out = Vec::new();
        counter.write(b"Te", &mut out).unwrap();
        counter.write(b"st", &mut out).unwrap();
        assert_eq!(counter.count(), 4);
        assert!(counter.close(&mut out).unwrap().is_ok());
        assert_eq!(out, b"Test");
    }

    #[test]
    fn test_mismatch_is_warning() {
        let mut counter = SizeCounter::new();
        counter.initialize(&StageDescriptor::new(SIZE_COUNTER_ID).with_data("10"), &context());

        let mut out = Vec::new();
        counter.write(b"Test", &mut out).unwrap();
        let status = counter.close(&mut out).unwrap();
        assert_eq!(status.severity, Severity::Warning);
    }

    #[test]
    fn test_missing_download_size() {
        let mut counter = SizeCounter::new();
        let status = counter.initialize(
            &StageDescriptor::new(SIZE_COUNTER_ID).with_data("download").required(),
            &context(),
        );
        assert_eq!(status.severity, Severity::Error);
        assert!(!counter.is_enabled());
    }
}
