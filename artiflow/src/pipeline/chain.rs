//! Linked stage chains.
//!
//! A [`Pipeline`] owns an ordered list of stages and a terminal sink. Bytes
//! written into the pipeline enter the first enabled stage; each stage
//! writes into the rest of the chain, and the last one writes into the sink.
//! Disabled stages are bypassed.

use crate::core::{Outcome, StageKind};
use crate::errors::{ArtiflowError, Result};
use crate::stages::Stage;
use std::fmt;
use std::io::{self, Write};
use tracing::debug;

/// A stage instance together with its bookkeeping in a chain.
#[derive(Debug)]
pub struct StageHandle {
    processor_id: String,
    required: bool,
    kind: Option<StageKind>,
    stage: Box<dyn Stage>,
    status: Outcome,
    closed: bool,
}

impl StageHandle {
    /// Wraps an initialized stage. `kind` is `None` for unresolved ids.
    #[must_use]
    pub fn new(
        processor_id: impl Into<String>,
        required: bool,
        kind: Option<StageKind>,
        stage: Box<dyn Stage>,
        status: Outcome,
    ) -> Self {
        Self {
            processor_id: processor_id.into(),
            required,
            kind,
            stage,
            status,
            closed: false,
        }
    }

    /// The processor id this stage was created for.
    #[must_use]
    pub fn processor_id(&self) -> &str {
        &self.processor_id
    }

    /// Whether the declaration was required.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.required
    }

    /// The registered kind, or `None` if the id did not resolve.
    #[must_use]
    pub const fn kind(&self) -> Option<StageKind> {
        self.kind
    }

    /// Returns true if the id resolved to an implementation.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.kind.is_some()
    }

    /// Returns true if the stage takes part in processing.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.stage.is_enabled()
    }

    /// The stage's own status.
    #[must_use]
    pub const fn status(&self) -> &Outcome {
        &self.status
    }

    /// Returns true once the stage has been closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn is_active(&self) -> bool {
        !self.closed && self.stage.is_enabled()
    }
}

/// The rest of a chain as seen by one stage.
struct Downstream<'a> {
    slots: &'a mut [StageHandle],
    sink: &'a mut dyn Write,
}

impl Write for Downstream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        write_chain(self.slots, self.sink, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        flush_chain(self.slots, self.sink)?;
        Ok(())
    }
}

fn write_chain(slots: &mut [StageHandle], sink: &mut dyn Write, buf: &[u8]) -> Result<()> {
    match slots.split_first_mut() {
        None => {
            sink.write_all(buf)?;
            Ok(())
        }
        Some((head, rest)) if !head.is_active() => write_chain(rest, sink, buf),
        Some((head, rest)) => head.stage.write(buf, &mut Downstream { slots: rest, sink }),
    }
}

fn flush_chain(slots: &mut [StageHandle], sink: &mut dyn Write) -> Result<()> {
    match slots.split_first_mut() {
        None => {
            sink.flush()?;
            Ok(())
        }
        Some((head, rest)) if !head.is_active() => flush_chain(rest, sink),
        Some((head, rest)) => head.stage.flush(&mut Downstream { slots: rest, sink }),
    }
}

fn close_chain(slots: &mut [StageHandle], sink: &mut dyn Write) -> Result<()> {
    let Some((head, rest)) = slots.split_first_mut() else {
        return Ok(());
    };
    if !head.closed {
        head.closed = true;
        if head.stage.is_enabled() {
            let mut downstream = Downstream {
                slots: &mut *rest,
                sink: &mut *sink,
            };
            match head.stage.close(&mut downstream) {
                Ok(outcome) => head.status = outcome,
                Err(err) => {
                    head.status = Outcome::error(format!("{} failed to close", head.processor_id))
                        .with_cause(&err);
                    return Err(err);
                }
            }
        }
        debug!(processor_id = %head.processor_id, severity = %head.status.severity, "Stage closed");
    }
    close_chain(rest, sink)
}

/// An ordered chain of stages in front of a sink.
pub struct Pipeline<W: Write> {
    stages: Vec<StageHandle>,
    sink: W,
    closed: bool,
}

impl<W: Write> Pipeline<W> {
    /// Links `stages` in order in front of `sink`.
    pub fn new(stages: Vec<StageHandle>, sink: W) -> Self {
        debug!(stages = stages.len(), "Pipeline linked");
        Self {
            stages,
            sink,
            closed: false,
        }
    }

    /// Number of stages, enabled or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if bytes go straight to the sink.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The stages in chain order.
    #[must_use]
    pub fn stages(&self) -> &[StageHandle] {
        &self.stages
    }

    /// Pushes bytes through the chain.
    ///
    /// Never stops because a stage reports a bad status; only hard errors
    /// are returned.
    pub fn process(&mut self, buf: &[u8]) -> Result<()> {
        if self.closed {
            return Err(ArtiflowError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pipeline already closed",
            )));
        }
        write_chain(&mut self.stages, &mut self.sink, buf)
    }

    /// Closes every stage in chain order, then flushes the sink.
    ///
    /// The sink itself is not closed. Calling `close` again is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        close_chain(&mut self.stages, &mut self.sink)?;
        self.sink.flush()?;
        Ok(())
    }

    /// Status of the chain head.
    ///
    /// With `deep`, the aggregate over every stage, with one child per stage
    /// in chain order.
    #[must_use]
    pub fn status(&self, deep: bool) -> Outcome {
        self.status_from(0, deep).unwrap_or_default()
    }

    /// Status of the stage at `index`, or the aggregate from it to the end
    /// of the chain. `None` if there is no such stage.
    #[must_use]
    pub fn status_from(&self, index: usize, deep: bool) -> Option<Outcome> {
        let tail = self.stages.get(index..).filter(|tail| !tail.is_empty())?;
        if !deep {
            return Some(tail[0].status.clone());
        }
        Some(Outcome::aggregate(
            format!("Status of {} stages", tail.len()),
            tail.iter().map(|handle| handle.status.clone()).collect(),
        ))
    }

    /// The deep status filtered to stages at `Error` or above.
    #[must_use]
    pub fn error_status(&self) -> Outcome {
        self.status(true).errors_only()
    }

    /// Fails with the error status if any stage is at `Error` or above.
    pub fn check_status(&self) -> Result<()> {
        let errors = self.error_status();
        if errors.is_error() {
            return Err(ArtiflowError::Status(errors));
        }
        Ok(())
    }

    /// The sink.
    pub const fn sink(&self) -> &W {
        &self.sink
    }

    /// Consumes the pipeline and returns the sink.
    pub fn into_sink(self) -> W {
        self.sink
    }
}

impl<W: Write> Write for Pipeline<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.process(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        flush_chain(&mut self.stages, &mut self.sink)?;
        Ok(())
    }
}

impl<W: Write> fmt::Debug for Pipeline<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}
