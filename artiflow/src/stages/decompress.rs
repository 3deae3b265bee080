//! Streaming gzip decoding.

use super::Stage;
use crate::core::{ArtifactDescriptor, Outcome, StageDescriptor};
use crate::errors::Result;
use flate2::write::GzDecoder;
use std::io::Write;
use tracing::debug;

/// Registry id of the gzip decoder.
pub const GZIP_DECODE_ID: &str = "decode.gzip";

/// Inflates a gzip member, forwarding decompressed bytes as soon as they are
/// produced.
#[derive(Default)]
pub struct GzipDecodeStage {
    decoder: Option<GzDecoder<Vec<u8>>>,
}

impl std::fmt::Debug for GzipDecodeStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GzipDecodeStage")
            .field("active", &self.decoder.is_some())
            .finish()
    }
}

impl GzipDecodeStage {
    /// Creates a decoder stage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn drain(decoder: &mut GzDecoder<Vec<u8>>, next: &mut dyn Write) -> Result<()> {
        let pending = decoder.get_mut();
        if !pending.is_empty() {
            next.write_all(pending)?;
            pending.clear();
        }
        Ok(())
    }
}

impl Stage for GzipDecodeStage {
    fn initialize(&mut self, _descriptor: &StageDescriptor, _context: &ArtifactDescriptor) -> Outcome {
        self.decoder = Some(GzDecoder::new(Vec::new()));
        Outcome::ok()
    }

    fn write(&mut self, buf: &[u8], next: &mut dyn Write) -> Result<()> {
        let Some(decoder) = self.decoder.as_mut() else {
            next.write_all(buf)?;
            return Ok(());
        };
        decoder.write_all(buf)?;
        Self::drain(decoder, next)
    }

    fn close(&mut self, next: &mut dyn Write) -> Result<Outcome> {
        let Some(mut decoder) = self.decoder.take() else {
            return Ok(Outcome::ok());
        };
        decoder.try_finish()?;
        Self::drain(&mut decoder, next)?;
        debug!(processor_id = GZIP_DECODE_ID, "Gzip stream finished");
        Ok(Outcome::ok())
    }
}
