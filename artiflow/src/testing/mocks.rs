//! Scripted stages and sinks for exercising chains.

use crate::core::{ArtifactDescriptor, Outcome, StageDescriptor};
use crate::errors::{ArtiflowError, Result};
use crate::stages::Stage;
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;

/// Calls observed by a [`ScriptedStage`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageCalls {
    /// Number of `write` calls.
    pub writes: usize,
    /// Number of `flush` calls.
    pub flushes: usize,
    /// Number of `close` calls.
    pub closes: usize,
    /// Every byte written into the stage.
    pub bytes: Vec<u8>,
}

/// A pass-through stage whose behaviour is set up by the test.
///
/// The call record is shared, so it stays readable after the stage has been
/// moved into a pipeline.
#[derive(Debug, Clone)]
pub struct ScriptedStage {
    enabled: bool,
    init_outcome: Outcome,
    close_outcome: Outcome,
    fail_close: bool,
    calls: Arc<Mutex<StageCalls>>,
}

impl Default for ScriptedStage {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedStage {
    /// Creates an enabled stage that reports OK.
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            init_outcome: Outcome::ok(),
            close_outcome: Outcome::ok(),
            fail_close: false,
            calls: Arc::new(Mutex::new(StageCalls::default())),
        }
    }

    /// Makes the stage report itself disabled.
    #[must_use]
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Sets the status returned from `initialize`.
    #[must_use]
    pub fn with_init_outcome(mut self, outcome: Outcome) -> Self {
        self.init_outcome = outcome;
        self
    }

    /// Sets the status returned from `close`.
    #[must_use]
    pub fn with_close_outcome(mut self, outcome: Outcome) -> Self {
        self.close_outcome = outcome;
        self
    }

    /// Makes `close` fail with a resource exhaustion error.
    #[must_use]
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    /// Shared handle on the call record.
    #[must_use]
    pub fn calls(&self) -> Arc<Mutex<StageCalls>> {
        Arc::clone(&self.calls)
    }
}

impl Stage for ScriptedStage {
    fn initialize(&mut self, _descriptor: &StageDescriptor, _context: &ArtifactDescriptor) -> Outcome {
        self.init_outcome.clone()
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn write(&mut self, buf: &[u8], next: &mut dyn Write) -> Result<()> {
        {
            let mut calls = self.calls.lock();
            calls.writes += 1;
            calls.bytes.extend_from_slice(buf);
        }
        next.write_all(buf)?;
        Ok(())
    }

    fn flush(&mut self, next: &mut dyn Write) -> Result<()> {
        self.calls.lock().flushes += 1;
        next.flush()?;
        Ok(())
    }

    fn close(&mut self, _next: &mut dyn Write) -> Result<Outcome> {
        self.calls.lock().closes += 1;
        if self.fail_close {
            return Err(ArtiflowError::exhausted("scripted close failure"));
        }
        Ok(self.close_outcome.clone())
    }
}

/// A sink whose content stays readable after it has been handed off.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    bytes: Arc<Mutex<Vec<u8>>>,
    flushes: Arc<Mutex<usize>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received so far.
    #[must_use]
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().clone()
    }

    /// Number of flushes received.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        *self.flushes.lock()
    }
}

impl Write for RecordingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        *self.flushes.lock() += 1;
        Ok(())
    }
}

/// A sink that rejects every write.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingSink;

impl Write for FailingSink {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink rejects writes"))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactKey, Severity, Version};

    fn context() -> ArtifactDescriptor {
        ArtifactDescriptor::new(ArtifactKey::new("ns", "binary", "tool", Version::new(1, 0, 0)))
    }

    #[test]
    fn test_scripted_stage_records_calls() {
        let mut stage = ScriptedStage::new();
        let calls = stage.calls();
        let mut out = Vec::new();

        stage.write(b"ab", &mut out).unwrap();
        stage.write(b"c", &mut out).unwrap();
        stage.flush(&mut out).unwrap();
        stage.close(&mut out).unwrap();

        let calls = calls.lock();
        assert_eq!(calls.writes, 2);
        assert_eq!(calls.flushes, 1);
        assert_eq!(calls.closes, 1);
        assert_eq!(calls.bytes, b"abc");
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_scripted_outcomes() {
        let mut stage = ScriptedStage::new()
            .with_init_outcome(Outcome::info("init"))
            .failing_close();

        let status = stage.initialize(&StageDescriptor::new("scripted"), &context());
        assert_eq!(status.severity, Severity::Info);
        assert!(stage.close(&mut Vec::new()).unwrap_err().is_resource_exhausted());
    }

    #[test]
    fn test_recording_sink_shares_contents() {
        let sink = RecordingSink::new();
        let mut handle = sink.clone();
        handle.write_all(b"xyz").unwrap();
        handle.flush().unwrap();

        assert_eq!(sink.contents(), b"xyz");
        assert_eq!(sink.flush_count(), 1);
    }

    #[test]
    fn test_failing_sink() {
        assert!(FailingSink.write_all(b"x").is_err());
    }
}
