//! Cooperative cancellation for long-running batches.

use crate::core::{Outcome, Severity};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// A flag checked between units of work.
///
/// Work already in flight is never interrupted. Only the first reason is
/// kept.
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
}

impl CancellationToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            info!(reason = %reason, "Cancellation requested");
            *self.reason.write() = Some(reason);
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// The reason given to the first `cancel` call.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// A `Cancel` outcome carrying the reason, or OK if not cancelled.
    #[must_use]
    pub fn status(&self) -> Outcome {
        if !self.is_cancelled() {
            return Outcome::ok();
        }
        let reason = self.reason().unwrap_or_else(|| "cancelled".to_string());
        Outcome::new(Severity::Cancel, reason)
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_token_is_live() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
        assert!(token.status().is_ok());
    }

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        token.cancel("shutdown");
        token.cancel("second");

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("shutdown"));
        assert_eq!(token.status().severity, Severity::Cancel);
        assert!(token.status().is_error());
    }

    #[test]
    fn test_cancel_from_another_thread() {
        let token = Arc::new(CancellationToken::new());
        let remote = Arc::clone(&token);
        thread::spawn(move || remote.cancel("remote")).join().unwrap();

        assert!(token.is_cancelled());
    }
}
