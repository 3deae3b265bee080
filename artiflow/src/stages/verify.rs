//! Streaming digest verification.
//!
//! Bytes are forwarded untouched while a digest is accumulated over them.
//! The comparison only happens at close: a mismatch is reported as an error
//! status, the bytes already forwarded are not retracted.

use super::{resolve_expected, Stage};
use crate::core::{properties, ArtifactDescriptor, Outcome, StageDescriptor};
use crate::errors::Result;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::io::Write;
use tracing::{debug, warn};

/// Digest algorithms a verifier can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    /// MD5, 32 hex digits.
    Md5,
    /// SHA-256, 64 hex digits.
    Sha256,
}

impl DigestAlgorithm {
    /// Registry id of the verifier for this algorithm.
    #[must_use]
    pub const fn processor_id(self) -> &'static str {
        match self {
            Self::Md5 => "verify.md5",
            Self::Sha256 => "verify.sha256",
        }
    }

    const fn hex_len(self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha256 => 64,
        }
    }

    const fn properties(self) -> (&'static str, &'static str) {
        match self {
            Self::Md5 => (properties::DOWNLOAD_MD5, properties::ARTIFACT_MD5),
            Self::Sha256 => (properties::DOWNLOAD_SHA256, properties::ARTIFACT_SHA256),
        }
    }
}

#[derive(Debug, Clone)]
enum Hasher {
    Md5(Md5),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Md5 => Self::Md5(Md5::new()),
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, buf: &[u8]) {
        match self {
            Self::Md5(h) => h.update(buf),
            Self::Sha256(h) => h.update(buf),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Verifies the digest of the bytes passing through.
///
/// The expected value comes from the stage data: a literal hex digest, or
/// `download`/`artifact` to read it from the artifact context.
#[derive(Debug)]
pub struct DigestVerifier {
    algorithm: DigestAlgorithm,
    expected: Option<String>,
    hasher: Option<Hasher>,
}

impl DigestVerifier {
    /// Creates an unconfigured verifier.
    #[must_use]
    pub const fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            expected: None,
            hasher: None,
        }
    }

    /// Computes the hex digest of `data`.
    #[must_use]
    pub fn digest_hex(algorithm: DigestAlgorithm, data: &[u8]) -> String {
        let mut hasher = Hasher::new(algorithm);
        hasher.update(data);
        hasher.finalize_hex()
    }
}

impl Stage for DigestVerifier {
    fn initialize(&mut self, descriptor: &StageDescriptor, context: &ArtifactDescriptor) -> Outcome {
        let id = self.algorithm.processor_id();
        let (download, artifact) = self.algorithm.properties();
        let Some(expected) = resolve_expected(descriptor.data(), context, download, artifact) else {
            return Outcome::config_problem(
                descriptor.required,
                format!("{id}: no expected digest available for {}", context.key),
            );
        };

        let expected = expected.trim().to_ascii_lowercase();
        if expected.len() != self.algorithm.hex_len()
            || !expected.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Outcome::config_problem(
                descriptor.required,
                format!("{id}: '{expected}' is not a valid digest"),
            );
        }

        debug!(processor_id = id, %expected, "Digest verifier configured");
        self.expected = Some(expected);
        self.hasher = Some(Hasher::new(self.algorithm));
        Outcome::ok()
    }

    fn is_enabled(&self) -> bool {
        self.expected.is_some()
    }

    fn write(&mut self, buf: &[u8], next: &mut dyn Write) -> Result<()> {
        if let Some(hasher) = self.hasher.as_mut() {
            hasher.update(buf);
        }
        next.write_all(buf)?;
        Ok(())
    }

    fn close(&mut self, _next: &mut dyn Write) -> Result<Outcome> {
        let (Some(hasher), Some(expected)) = (self.hasher.take(), self.expected.as_deref()) else {
            return Ok(Outcome::ok());
        };
        let actual = hasher.finalize_hex();
        if actual == expected {
            debug!(processor_id = self.algorithm.processor_id(), "Digest verified");
            return Ok(Outcome::ok());
        }

        warn!(
            processor_id = self.algorithm.processor_id(),
            expected,
            actual = %actual,
            "Digest mismatch"
        );
        Ok(Outcome::error(format!(
            "{} mismatch: expected {expected}, computed {actual}",
            self.algorithm.processor_id()
        )))
    }
}
