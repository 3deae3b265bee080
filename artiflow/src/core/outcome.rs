//! Outcome values and their aggregation into status trees.

use super::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The result of a stage step, or an aggregate over several stages.
///
/// An outcome with children is a multi-status: its severity is the maximum
/// over its children and the children are kept in chain order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Outcome {
    /// How bad it is.
    pub severity: Severity,
    /// Human readable description.
    #[serde(default)]
    pub message: String,
    /// Underlying cause, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Per-stage outcomes of an aggregate.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Outcome>,
}

impl Outcome {
    /// Creates an outcome with the given severity and message.
    #[must_use]
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            cause: None,
            children: Vec::new(),
        }
    }

    /// Creates an OK outcome with no message.
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    /// Creates an informational outcome.
    #[must_use]
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    /// Creates a warning outcome.
    #[must_use]
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    /// Creates an error outcome.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Creates a configuration problem outcome: ERROR when the stage is
    /// required, INFO when it is optional.
    #[must_use]
    pub fn config_problem(required: bool, message: impl Into<String>) -> Self {
        Self::new(Severity::for_config_problem(required), message)
    }

    /// Attaches a cause.
    #[must_use]
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Aggregates child outcomes into a multi-status.
    #[must_use]
    pub fn aggregate(message: impl Into<String>, children: Vec<Self>) -> Self {
        let severity = max_severity(&children);
        Self {
            severity,
            message: message.into(),
            cause: None,
            children,
        }
    }

    /// Returns true if the severity is `Ok`.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.severity == Severity::Ok
    }

    /// Returns true if the severity is `Error` or `Cancel`.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity.is_error()
    }

    /// Returns true if this outcome carries per-stage children.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        !self.children.is_empty()
    }

    /// Keeps only the parts of the tree at `Error` or above.
    ///
    /// The result is OK with no children when nothing failed.
    #[must_use]
    pub fn errors_only(&self) -> Self {
        if !self.is_multi() {
            return if self.is_error() {
                self.clone()
            } else {
                Self::ok()
            };
        }
        let children: Vec<Self> = self
            .children
            .iter()
            .filter(|child| child.is_error())
            .map(Self::errors_only)
            .collect();
        if children.is_empty() {
            Self::ok()
        } else {
            Self::aggregate(self.message.clone(), children)
        }
    }
}

/// Maximum severity over a slice of outcomes; `Ok` for an empty slice.
#[must_use]
pub fn max_severity(outcomes: &[Outcome]) -> Severity {
    outcomes
        .iter()
        .map(|outcome| outcome.severity)
        .max()
        .unwrap_or_default()
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.severity)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(ref cause) = self.cause {
            write!(f, " ({cause})")?;
        }
        let failing: Vec<String> = self
            .children
            .iter()
            .filter(|child| !child.severity.is_ok_or_info())
            .map(ToString::to_string)
            .collect();
        if !failing.is_empty() {
            write!(f, " [{}]", failing.join("; "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_aggregate_takes_max_severity() {
        let agg = Outcome::aggregate(
            "chain",
            vec![Outcome::ok(), Outcome::error("bad"), Outcome::warning("meh")],
        );

        assert_eq!(agg.severity, Severity::Error);
        assert_eq!(agg.children.len(), 3);
        assert!(agg.is_multi());
    }

    #[test]
    fn test_aggregate_empty_is_ok() {
        let agg = Outcome::aggregate("nothing", Vec::new());
        assert!(agg.is_ok());
        assert!(!agg.is_multi());
    }

    #[test]
    fn test_errors_only_filters_children() {
        let agg = Outcome::aggregate(
            "chain",
            vec![Outcome::info("fine"), Outcome::error("bad"), Outcome::warning("meh")],
        );

        let errors = agg.errors_only();
        assert_eq!(errors.severity, Severity::Error);
        assert_eq!(errors.children, vec![Outcome::error("bad")]);
    }

    #[test]
    fn test_errors_only_without_errors_is_ok() {
        let agg = Outcome::aggregate("chain", vec![Outcome::warning("meh")]);
        assert_eq!(agg.errors_only(), Outcome::ok());
        assert_eq!(Outcome::warning("leaf").errors_only(), Outcome::ok());
    }

    #[test]
    fn test_nested_aggregate() {
        let inner = Outcome::aggregate("inner", vec![Outcome::error("deep")]);
        let outer = Outcome::aggregate("outer", vec![Outcome::ok(), inner]);

        assert_eq!(outer.severity, Severity::Error);
        assert_eq!(outer.errors_only().children[0].children.len(), 1);
    }

    #[test]
    fn test_display_lists_failing_children() {
        let agg = Outcome::aggregate(
            "chain",
            vec![Outcome::ok(), Outcome::error("md5 mismatch").with_cause("expected abc")],
        );
        let text = agg.to_string();

        assert!(text.starts_with("error: chain"));
        assert!(text.contains("md5 mismatch (expected abc)"));
    }

    #[test]
    fn test_config_problem() {
        assert!(Outcome::config_problem(true, "x").is_error());
        assert_eq!(Outcome::config_problem(false, "x").severity, Severity::Info);
    }
}
