//! Artifact versions.
//!
//! Grammar: `major[.minor[.micro[.qualifier]]]` where the numeric parts are
//! decimal integers and the qualifier is made of `[A-Za-z0-9_-]`. The empty
//! string is the empty version `0.0.0`.

use crate::errors::FormatError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:\.(\d+)(?:\.(\d+)(?:\.([A-Za-z0-9_-]+))?)?)?$")
        .expect("version pattern compiles")
});

/// A version with natural ordering: numeric parts first, then the qualifier
/// compared as a string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Version {
    major: u32,
    minor: u32,
    micro: u32,
    qualifier: String,
}

impl Version {
    /// Creates a version without a qualifier.
    #[must_use]
    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
            qualifier: String::new(),
        }
    }

    /// Sets the qualifier.
    #[must_use]
    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = qualifier.into();
        self
    }

    /// The empty version, `0.0.0`.
    #[must_use]
    pub const fn empty() -> Self {
        Self::new(0, 0, 0)
    }

    /// Major component.
    #[must_use]
    pub const fn major(&self) -> u32 {
        self.major
    }

    /// Minor component.
    #[must_use]
    pub const fn minor(&self) -> u32 {
        self.minor
    }

    /// Micro component.
    #[must_use]
    pub const fn micro(&self) -> u32 {
        self.micro
    }

    /// Qualifier, possibly empty.
    #[must_use]
    pub fn qualifier(&self) -> &str {
        &self.qualifier
    }

    /// Parses a version string.
    ///
    /// # Errors
    ///
    /// Returns `FormatError::MalformedVersion` if the input does not follow
    /// the version grammar.
    pub fn parse(input: &str) -> Result<Self, FormatError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }

        let captures = VERSION_PATTERN
            .captures(trimmed)
            .ok_or_else(|| FormatError::MalformedVersion(input.to_string()))?;

        let number = |index: usize| -> Result<u32, FormatError> {
            captures.get(index).map_or(Ok(0), |m| {
                m.as_str()
                    .parse()
                    .map_err(|_| FormatError::MalformedVersion(input.to_string()))
            })
        };

        Ok(Self {
            major: number(1)?,
            minor: number(2)?,
            micro: number(3)?,
            qualifier: captures
                .get(4)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        })
    }
}

impl FromStr for Version {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = FormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.micro)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}
