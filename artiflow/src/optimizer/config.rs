//! Optimizer configuration.

use crate::errors::{ArtiflowError, Result};
use crate::stages::delta::DEFAULT_PATCH_MEMORY;
use crate::stages::PatchLimits;
use serde::{Deserialize, Serialize};

/// Tuning for a delta optimization run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Number of newest members per family to optimize.
    #[serde(default = "default_width")]
    pub width: usize,
    /// Number of predecessors each target is diffed against.
    #[serde(default = "default_depth")]
    pub depth: usize,
    /// Whether archive-classified artifacts use the archive-aware strategy.
    #[serde(default = "default_archive_aware")]
    pub archive_aware: bool,
    /// Classifiers treated as zip-like archives.
    #[serde(default = "default_archive_classifiers")]
    pub archive_classifiers: Vec<String>,
    /// Memory budget for one patch computation, in bytes.
    #[serde(default = "default_patch_memory_limit")]
    pub patch_memory_limit: usize,
}

fn default_width() -> usize {
    1
}

fn default_depth() -> usize {
    1
}

fn default_archive_aware() -> bool {
    true
}

fn default_archive_classifiers() -> Vec<String> {
    vec!["osgi.bundle".to_string()]
}

fn default_patch_memory_limit() -> usize {
    DEFAULT_PATCH_MEMORY
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            depth: default_depth(),
            archive_aware: default_archive_aware(),
            archive_classifiers: default_archive_classifiers(),
            patch_memory_limit: default_patch_memory_limit(),
        }
    }
}

impl OptimizerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ArtiflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the width.
    #[must_use]
    pub const fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    /// Sets the depth.
    #[must_use]
    pub const fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// Enables or disables the archive-aware strategy.
    #[must_use]
    pub const fn with_archive_aware(mut self, archive_aware: bool) -> Self {
        self.archive_aware = archive_aware;
        self
    }

    /// Replaces the archive classifiers.
    #[must_use]
    pub fn with_archive_classifiers<I, S>(mut self, classifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.archive_classifiers = classifiers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the memory budget for one patch.
    #[must_use]
    pub const fn with_patch_memory_limit(mut self, bytes: usize) -> Self {
        self.patch_memory_limit = bytes;
        self
    }

    /// Returns true if the classifier names a zip-like archive.
    #[must_use]
    pub fn is_archive_classifier(&self, classifier: &str) -> bool {
        self.archive_classifiers.iter().any(|c| c == classifier)
    }

    /// Limits handed to the patch stages.
    #[must_use]
    pub const fn patch_limits(&self) -> PatchLimits {
        PatchLimits {
            max_buffer_bytes: self.patch_memory_limit,
        }
    }

    /// Rejects configurations that cannot plan anything.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 {
            return Err(ArtiflowError::Config("width must be at least 1".to_string()));
        }
        if self.depth == 0 {
            return Err(ArtiflowError::Config("depth must be at least 1".to_string()));
        }
        if self.patch_memory_limit == 0 {
            return Err(ArtiflowError::Config(
                "patch_memory_limit must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
