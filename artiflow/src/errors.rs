//! Error types for the artiflow pipeline.
//!
//! Stage-local problems (bad configuration, checksum mismatches) are carried
//! as [`Outcome`](crate::core::Outcome) values. Everything in this module is a
//! hard failure that propagates to the caller immediately.

use crate::core::Outcome;
use std::io;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ArtiflowError> = std::result::Result<T, E>;

/// The main error type for artiflow operations.
#[derive(Debug, Error)]
pub enum ArtiflowError {
    /// A binary format contract was violated.
    #[error("{0}")]
    Format(#[from] FormatError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(io::Error),

    /// The repository could not serve or store an artifact.
    #[error("Repository error for {key}: {message}")]
    Repository {
        /// External form of the artifact key involved.
        key: String,
        /// What went wrong.
        message: String,
    },

    /// A memory budget was exceeded or an allocation could not be reserved.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A status check found stages at error severity.
    #[error("Processing failed: {0}")]
    Status(Outcome),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A stored representation does not restore to the canonical bytes.
    #[error("Restore mismatch for {key}: {message}")]
    RestoreMismatch {
        /// External form of the artifact key involved.
        key: String,
        /// What differed.
        message: String,
    },
}

impl ArtiflowError {
    /// Creates a repository error.
    #[must_use]
    pub fn repository(key: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::Repository {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Creates a resource exhaustion error.
    #[must_use]
    pub fn exhausted(message: impl Into<String>) -> Self {
        Self::ResourceExhausted(message.into())
    }

    /// Creates a restore mismatch error.
    #[must_use]
    pub fn restore_mismatch(key: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::RestoreMismatch {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Returns true if a stored representation failed to restore faithfully.
    #[must_use]
    pub const fn is_restore_mismatch(&self) -> bool {
        matches!(self, Self::RestoreMismatch { .. })
    }

    /// Returns true if this error is a resource exhaustion.
    #[must_use]
    pub const fn is_resource_exhausted(&self) -> bool {
        matches!(self, Self::ResourceExhausted(_))
    }
}

impl From<io::Error> for ArtiflowError {
    /// Recovers an `ArtiflowError` that was tunnelled through an
    /// `io::Write` boundary, or wraps a genuine IO error.
    fn from(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Self>()) {
            return Self::Io(err);
        }
        let kind = err.kind();
        match err.into_inner() {
            Some(inner) => match inner.downcast::<Self>() {
                Ok(original) => *original,
                Err(other) => Self::Io(io::Error::new(kind, other)),
            },
            None => Self::Io(kind.into()),
        }
    }
}

impl From<ArtiflowError> for io::Error {
    fn from(err: ArtiflowError) -> Self {
        match err {
            ArtiflowError::Io(inner) => inner,
            other => Self::other(other),
        }
    }
}

/// Violations of a wire or text format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// The record stream did not start with the expected marker.
    #[error("Bad record stream marker: expected '{expected}', found '{found}'")]
    BadMarker {
        /// The marker this reader understands.
        expected: String,
        /// The marker actually read.
        found: String,
    },

    /// The record stream has an unsupported format version.
    #[error("Unsupported record stream version {found} (expected {expected})")]
    UnsupportedVersion {
        /// The version this reader understands.
        expected: i32,
        /// The version actually read.
        found: i32,
    },

    /// The input ended in the middle of a structure.
    #[error("Truncated input while reading {0}")]
    Truncated(String),

    /// An artifact key's external form could not be decoded.
    #[error("Malformed artifact key '{input}': {reason}")]
    MalformedKey {
        /// The offending input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A version string does not follow the version grammar.
    #[error("Malformed version '{0}'")]
    MalformedVersion(String),

    /// A binary patch is corrupt.
    #[error("Malformed patch: {0}")]
    MalformedPatch(String),

    /// A container is corrupt or uses an unsupported feature.
    #[error("Container error: {0}")]
    Container(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Severity;

    #[test]
    fn test_error_survives_io_boundary() {
        let original = ArtiflowError::exhausted("diff buffer");
        let tunnelled: io::Error = original.into();
        let recovered = ArtiflowError::from(tunnelled);

        assert!(recovered.is_resource_exhausted());
        assert!(recovered.to_string().contains("diff buffer"));
    }

    #[test]
    fn test_plain_io_error_stays_io() {
        let err = ArtiflowError::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(matches!(err, ArtiflowError::Io(ref e) if e.kind() == io::ErrorKind::BrokenPipe));

        let back: io::Error = err.into();
        assert_eq!(back.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_format_error_display() {
        let err = FormatError::UnsupportedVersion {
            expected: 2,
            found: 7,
        };
        assert_eq!(err.to_string(), "Unsupported record stream version 7 (expected 2)");

        let wrapped = ArtiflowError::from(err);
        assert!(matches!(wrapped, ArtiflowError::Format(_)));
    }

    #[test]
    fn test_status_error_display() {
        let err = ArtiflowError::Status(Outcome::new(Severity::Error, "md5 mismatch"));
        assert!(err.to_string().contains("md5 mismatch"));
    }

    #[test]
    fn test_repository_error() {
        let err = ArtiflowError::repository("ns,osgi.bundle,a,1.0.0", "not found");
        assert!(err.to_string().contains("ns,osgi.bundle,a,1.0.0"));
        assert!(!err.is_resource_exhausted());
    }

    #[test]
    fn test_restore_mismatch() {
        let err = ArtiflowError::restore_mismatch("ns,osgi.bundle,a,2.0.0", "md5 differs");
        assert!(err.is_restore_mismatch());
        assert!(!err.is_resource_exhausted());
        assert_eq!(err.to_string(), "Restore mismatch for ns,osgi.bundle,a,2.0.0: md5 differs");
    }
}
