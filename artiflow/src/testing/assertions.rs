//! Assertions on status trees.

use crate::core::{Outcome, Severity};

/// Asserts that the outcome has the expected severity.
pub fn assert_severity(outcome: &Outcome, expected: Severity) {
    assert_eq!(
        outcome.severity, expected,
        "Expected severity {expected:?}, got {outcome}"
    );
}

/// Asserts that the outcome is OK.
pub fn assert_status_ok(outcome: &Outcome) {
    assert!(outcome.is_ok(), "Expected OK status, got {outcome}");
}

/// Asserts that the outcome is at `Error` or above.
pub fn assert_status_error(outcome: &Outcome) {
    assert!(outcome.is_error(), "Expected error status, got {outcome}");
}

/// Asserts that the outcome's message or cause mentions `needle`.
pub fn assert_status_mentions(outcome: &Outcome, needle: &str) {
    let found = outcome.message.contains(needle)
        || outcome.cause.as_deref().is_some_and(|cause| cause.contains(needle));
    assert!(found, "Expected status to mention '{needle}', got {outcome}");
}

/// Asserts that the outcome is a multi-status with `expected` children.
pub fn assert_child_count(outcome: &Outcome, expected: usize) {
    assert_eq!(
        outcome.children.len(),
        expected,
        "Expected {expected} child statuses, got {outcome}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assertions_pass() {
        let outcome = Outcome::aggregate(
            "two",
            vec![Outcome::ok(), Outcome::error("bad").with_cause("digest mismatch")],
        );
        assert_severity(&outcome, Severity::Error);
        assert_status_error(&outcome);
        assert_child_count(&outcome, 2);
        assert_status_mentions(&outcome.children[1], "digest");
        assert_status_ok(&outcome.children[0]);
    }

    #[test]
    #[should_panic(expected = "Expected OK status")]
    fn test_assert_ok_fails_on_error() {
        assert_status_ok(&Outcome::error("bad"));
    }
}
