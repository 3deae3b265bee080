//! End-of-run accounting.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Counters describing one optimization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationSummary {
    /// Version families with at least two members.
    pub families: usize,
    /// Family members selected as targets by width.
    pub candidates: usize,
    /// Targets skipped because they already carry a patch of the chosen format.
    pub skipped_already_optimized: usize,
    /// Target/predecessor pairs planned.
    pub planned: usize,
    /// Pairs whose patch was committed.
    pub optimized: usize,
    /// Pairs retried with the raw strategy after exhausting memory.
    pub downgraded: usize,
    /// Pairs retried with the raw strategy because the archive patch did
    /// not restore the canonical bytes.
    pub mismatched: usize,
    /// Pairs given up on.
    pub abandoned: usize,
    /// Whether the run stopped early on cancellation.
    pub cancelled: bool,
}

impl OptimizationSummary {
    /// Pairs neither committed nor abandoned.
    #[must_use]
    pub const fn unattempted(&self) -> usize {
        self.planned
            .saturating_sub(self.optimized)
            .saturating_sub(self.abandoned)
    }

    /// Emits the summary as a structured log line.
    pub fn log(&self) {
        info!(
            families = self.families,
            candidates = self.candidates,
            skipped = self.skipped_already_optimized,
            planned = self.planned,
            optimized = self.optimized,
            downgraded = self.downgraded,
            mismatched = self.mismatched,
            abandoned = self.abandoned,
            cancelled = self.cancelled,
            "Optimization finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unattempted() {
        let summary = OptimizationSummary {
            planned: 5,
            optimized: 2,
            abandoned: 1,
            ..Default::default()
        };
        assert_eq!(summary.unattempted(), 2);
    }

    #[test]
    fn test_serializes_counters() {
        let summary = OptimizationSummary {
            families: 1,
            ..Default::default()
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["families"], 1);
        assert_eq!(json["cancelled"], false);
    }
}
