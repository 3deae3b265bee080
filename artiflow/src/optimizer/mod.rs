//! Delta optimization.
//!
//! Groups repository artifacts into version families, decides which
//! (target, predecessor) pairs get a patch representation, and produces the
//! patches through ordinary pipelines. Patches that exhaust memory under the
//! archive-aware strategy are retried once with the raw strategy.

mod config;
mod executor;
mod planner;
mod summary;

pub use config::OptimizerConfig;
pub use executor::Optimizer;
pub use planner::{group_families, PatchPlan, Planner, VersionFamily};
pub use summary::OptimizationSummary;
