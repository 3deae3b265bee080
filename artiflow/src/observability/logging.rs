//! Subscriber setup for the `tracing` output of pipelines and optimizer
//! runs.

use crate::errors::{ArtiflowError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing_subscriber::{fmt as fmt_layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Minimum level of emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-stage lifecycle events.
    Trace,
    /// Stage configuration and chain linking.
    Debug,
    /// Run plans and summaries.
    #[default]
    Info,
    /// Mismatches, downgrades and abandoned pairs.
    Warn,
    /// Errors only.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        })
    }
}

impl FromStr for LogLevel {
    type Err = ArtiflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Self::Trace),
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(ArtiflowError::Config(format!("invalid log level '{other}'"))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level used when `RUST_LOG` is not set.
    #[serde(default)]
    pub level: LogLevel,
    /// Emit JSON lines instead of human readable text.
    #[serde(default)]
    pub json: bool,
    /// Include event targets in the output.
    #[serde(default = "default_include_targets")]
    pub include_targets: bool,
}

fn default_include_targets() -> bool {
    true
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            json: false,
            include_targets: default_include_targets(),
        }
    }
}

impl LogConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the level.
    #[must_use]
    pub const fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Switches JSON output on or off.
    #[must_use]
    pub const fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Filter built from `RUST_LOG`, falling back to the configured level.
    #[must_use]
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.to_string()))
    }
}

/// Installs a global fmt subscriber.
///
/// Returns `false` if a global subscriber was already installed, which
/// keeps repeated initialization in tests harmless.
pub fn init_tracing(config: &LogConfig) -> bool {
    let layer = fmt_layer::layer().with_target(config.include_targets);
    let registry = tracing_subscriber::registry().with(config.filter());
    let installed = if config.json {
        registry.with(layer.json()).try_init()
    } else {
        registry.with(layer).try_init()
    };
    installed.is_ok()
}
