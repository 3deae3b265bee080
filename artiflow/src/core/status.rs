//! Severity levels and stage kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a stage performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// A stage that rewrites bytes one at a time (add, multiply, shift).
    #[default]
    Transform,
    /// A stage that observes the stream and checks it at close (digests, sizes).
    Verify,
    /// A stage that decodes an encoded stream (decompression).
    Decode,
    /// A stage that produces or consumes a binary delta.
    Delta,
}

impl StageKind {
    /// Returns true if at most one stage of this kind may appear in a pipeline.
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        matches!(self, Self::Delta)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transform => write!(f, "transform"),
            Self::Verify => write!(f, "verify"),
            Self::Decode => write!(f, "decode"),
            Self::Delta => write!(f, "delta"),
        }
    }
}

/// Ordered outcome level.
///
/// Aggregation over several outcomes always takes the maximum.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Everything worked.
    #[default]
    Ok,
    /// Informational; nothing failed.
    Info,
    /// Something is off but the bytes are usable.
    Warning,
    /// The stage failed.
    Error,
    /// The operation was cancelled.
    Cancel,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Cancel => write!(f, "cancel"),
        }
    }
}

impl Severity {
    /// Severity used for a configuration problem in a stage.
    #[must_use]
    pub const fn for_config_problem(required: bool) -> Self {
        if required {
            Self::Error
        } else {
            Self::Info
        }
    }

    /// Returns true for `Error` and `Cancel`.
    #[must_use]
    pub fn is_error(self) -> bool {
        self >= Self::Error
    }

    /// Returns true for `Ok` and `Info`.
    #[must_use]
    pub fn is_ok_or_info(self) -> bool {
        self <= Self::Info
    }
}
