//! Running a delta optimization over a repository.

use super::planner::{PatchPlan, Planner};
use super::{OptimizationSummary, OptimizerConfig};
use crate::cancellation::CancellationToken;
use crate::core::ArtifactDescriptor;
use crate::errors::{ArtiflowError, Result};
use crate::pipeline::{PipelineFactory, StageRegistry};
use crate::repository::{ArtifactQuery, ArtifactRepository};
use crate::stages::PatchStrategy;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};
use uuid::Uuid;

/// Stores artifacts as patches against their predecessors.
pub struct Optimizer {
    repository: Arc<dyn ArtifactRepository>,
    config: OptimizerConfig,
    query: ArtifactQuery,
    factory: PipelineFactory,
    cancellation: Arc<CancellationToken>,
}

impl Optimizer {
    /// Creates an optimizer over `repository`.
    ///
    /// Fails if the configuration does not validate.
    pub fn new(repository: Arc<dyn ArtifactRepository>, config: OptimizerConfig) -> Result<Self> {
        config.validate()?;
        let registry = StageRegistry::with_builtin_stages(Arc::clone(&repository), config.patch_limits());
        Ok(Self {
            repository,
            config,
            query: ArtifactQuery::all(),
            factory: PipelineFactory::new(Arc::new(registry)),
            cancellation: Arc::new(CancellationToken::new()),
        })
    }

    /// Restricts the run to keys matching `query`.
    #[must_use]
    pub fn with_query(mut self, query: ArtifactQuery) -> Self {
        self.query = query;
        self
    }

    /// Uses a shared cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// The token checked between pairs.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancellation
    }

    /// Computes the plan without writing anything.
    #[must_use]
    pub fn plan(&self) -> (Vec<PatchPlan>, OptimizationSummary) {
        let mut summary = OptimizationSummary::default();
        let keys = self.repository.query(&self.query);
        let plans = Planner::new(&self.config, self.repository.as_ref()).plan(keys, &mut summary);
        (plans, summary)
    }

    /// Plans and produces every patch.
    ///
    /// Failures of one pair are logged and counted. An archive patch that
    /// exhausts memory or does not restore the canonical bytes is retried
    /// raw. The only fatal error is memory exhaustion under the raw strategy.
    pub fn run(&self) -> Result<OptimizationSummary> {
        let run_id = Uuid::new_v4();
        let span = info_span!("optimize", run_id = %run_id);
        let _guard = span.enter();

        let (plans, mut summary) = self.plan();
        info!(
            families = summary.families,
            planned = summary.planned,
            "Optimization planned"
        );

        for plan in &plans {
            if self.cancellation.is_cancelled() {
                warn!(
                    reason = self.cancellation.reason().as_deref().unwrap_or("unspecified"),
                    "Optimization cancelled"
                );
                summary.cancelled = true;
                break;
            }
            self.run_pair(plan, &mut summary)?;
        }

        summary.log();
        Ok(summary)
    }

    fn run_pair(&self, plan: &PatchPlan, summary: &mut OptimizationSummary) -> Result<()> {
        let result = match self.execute(plan) {
            Err(err) if err.is_resource_exhausted() && plan.strategy == PatchStrategy::Archive => {
                warn!(
                    target = %plan.target,
                    predecessor = %plan.predecessor,
                    error = %err,
                    "Archive patch exhausted memory, retrying raw"
                );
                summary.downgraded += 1;
                self.execute(&plan.with_strategy(PatchStrategy::Raw))
            }
            Err(err) if err.is_restore_mismatch() && plan.strategy == PatchStrategy::Archive => {
                warn!(
                    target = %plan.target,
                    predecessor = %plan.predecessor,
                    error = %err,
                    "Archive patch does not restore the canonical bytes, retrying raw"
                );
                summary.mismatched += 1;
                self.execute(&plan.with_strategy(PatchStrategy::Raw))
            }
            other => other,
        };

        match result {
            Ok(()) => {
                summary.optimized += 1;
                Ok(())
            }
            Err(err) if err.is_resource_exhausted() => Err(err),
            Err(err) => {
                warn!(
                    target = %plan.target,
                    predecessor = %plan.predecessor,
                    error = %err,
                    "Abandoning patch"
                );
                summary.abandoned += 1;
                Ok(())
            }
        }
    }

    /// Produces one patch, checks that it restores the canonical bytes and
    /// commits it.
    pub fn execute(&self, plan: &PatchPlan) -> Result<()> {
        let canonical = self
            .repository
            .descriptors(&plan.target)
            .into_iter()
            .find(ArtifactDescriptor::is_canonical);
        let context = canonical
            .clone()
            .unwrap_or_else(|| ArtifactDescriptor::new(plan.target.clone()));
        let descriptor = plan.patch_descriptor(canonical.as_ref());

        let bytes = self.repository.fetch_canonical(&plan.target)?;
        let mut pipeline = self
            .factory
            .create_and_link(&[plan.generate_step()], &context, Vec::new());
        pipeline.process(&bytes)?;
        pipeline.close()?;
        pipeline.check_status()?;
        let patch = pipeline.into_sink();

        self.verify_restore(plan, &descriptor, &patch, &bytes)?;

        let mut sink = self.repository.open_sink(&descriptor)?;
        sink.write_all(&patch)?;
        sink.commit()?;

        debug!(
            target = %plan.target,
            predecessor = %plan.predecessor,
            strategy = %plan.strategy,
            patch = patch.len(),
            "Patch committed"
        );
        Ok(())
    }

    /// Reads `patch` back through `descriptor` and compares the result with
    /// `expected`.
    fn verify_restore(
        &self,
        plan: &PatchPlan,
        descriptor: &ArtifactDescriptor,
        patch: &[u8],
        expected: &[u8],
    ) -> Result<()> {
        let restored = match self.factory.process(descriptor, patch, Vec::new()) {
            Ok(restored) => restored,
            Err(ArtiflowError::Status(status)) => {
                return Err(ArtiflowError::restore_mismatch(&plan.target, status.to_string()))
            }
            Err(ArtiflowError::Format(err)) => {
                return Err(ArtiflowError::restore_mismatch(&plan.target, err.to_string()))
            }
            Err(err) => return Err(err),
        };
        if restored != expected {
            return Err(ArtiflowError::restore_mismatch(
                &plan.target,
                format!(
                    "{} restored bytes differ from {} canonical bytes",
                    restored.len(),
                    expected.len()
                ),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optimizer")
            .field("config", &self.config)
            .field("query", &self.query)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish_non_exhaustive()
    }
}
