//! Choosing which version pairs to store as patches.

use super::{OptimizationSummary, OptimizerConfig};
use crate::core::{properties, ArtifactDescriptor, ArtifactKey, FamilyKey, StageDescriptor};
use crate::repository::ArtifactRepository;
use crate::stages::{DigestAlgorithm, PatchStrategy};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Artifact keys that differ only by version, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionFamily {
    /// The shared identity.
    pub family: FamilyKey,
    /// Members in descending version order.
    pub members: Vec<ArtifactKey>,
}

impl VersionFamily {
    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the family has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Groups keys into families, each sorted newest first.
///
/// Families come out in family key order.
#[must_use]
pub fn group_families(keys: impl IntoIterator<Item = ArtifactKey>) -> Vec<VersionFamily> {
    let mut grouped: BTreeMap<FamilyKey, Vec<ArtifactKey>> = BTreeMap::new();
    for key in keys {
        grouped.entry(key.family()).or_default().push(key);
    }
    grouped
        .into_iter()
        .map(|(family, mut members)| {
            members.sort_by(|a, b| b.version.cmp(&a.version));
            members.dedup();
            VersionFamily { family, members }
        })
        .collect()
}

/// One patch to produce: `target` stored as a diff against `predecessor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchPlan {
    /// The artifact that gets a patch representation.
    pub target: ArtifactKey,
    /// The artifact the patch is computed against.
    pub predecessor: ArtifactKey,
    /// How the bytes are prepared before diffing.
    pub strategy: PatchStrategy,
}

impl PatchPlan {
    /// Registry id of the stage that generates the patch.
    #[must_use]
    pub const fn stage_id(&self) -> &'static str {
        self.strategy.generate_id()
    }

    /// Returns true if archives are normalized before diffing.
    #[must_use]
    pub fn archive_aware(&self) -> bool {
        self.strategy == PatchStrategy::Archive
    }

    /// The same pair under another strategy.
    #[must_use]
    pub fn with_strategy(&self, strategy: PatchStrategy) -> Self {
        Self {
            strategy,
            ..self.clone()
        }
    }

    /// The step that generates this patch.
    #[must_use]
    pub fn generate_step(&self) -> StageDescriptor {
        StageDescriptor::new(self.stage_id())
            .with_data(self.predecessor.to_external_form())
            .required()
    }

    /// Descriptor under which the patch is stored.
    ///
    /// Reading it back applies the patch. Artifact-level properties of
    /// `canonical` are carried over, and every artifact digest it declares
    /// gets a required verifier after the apply step.
    #[must_use]
    pub fn patch_descriptor(&self, canonical: Option<&ArtifactDescriptor>) -> ArtifactDescriptor {
        let mut steps = vec![StageDescriptor::new(self.strategy.apply_id())
            .with_data(self.predecessor.to_external_form())
            .required()];
        let mut descriptor = ArtifactDescriptor::new(self.target.clone())
            .with_property(properties::FORMAT, self.strategy.format_id());
        if let Some(canonical) = canonical {
            for name in [
                properties::ARTIFACT_SIZE,
                properties::ARTIFACT_MD5,
                properties::ARTIFACT_SHA256,
            ] {
                if let Some(value) = canonical.property(name) {
                    descriptor = descriptor.with_property(name, value);
                }
            }
            for (name, algorithm) in [
                (properties::ARTIFACT_MD5, DigestAlgorithm::Md5),
                (properties::ARTIFACT_SHA256, DigestAlgorithm::Sha256),
            ] {
                if canonical.property(name).is_some() {
                    steps.push(
                        StageDescriptor::new(algorithm.processor_id())
                            .with_data("artifact")
                            .required(),
                    );
                }
            }
        }
        descriptor.with_processing_steps(steps)
    }
}

/// Selects patch pairs from a repository.
pub struct Planner<'a> {
    config: &'a OptimizerConfig,
    repository: &'a dyn ArtifactRepository,
}

impl<'a> Planner<'a> {
    /// Creates a planner over `repository`.
    #[must_use]
    pub fn new(config: &'a OptimizerConfig, repository: &'a dyn ArtifactRepository) -> Self {
        Self { config, repository }
    }

    /// The strategy used for a key's patches.
    #[must_use]
    pub fn strategy_for(&self, key: &ArtifactKey) -> PatchStrategy {
        if self.config.archive_aware && self.config.is_archive_classifier(&key.classifier) {
            PatchStrategy::Archive
        } else {
            PatchStrategy::Raw
        }
    }

    /// Plans every family among `keys`, updating the summary counters.
    pub fn plan(
        &self,
        keys: impl IntoIterator<Item = ArtifactKey>,
        summary: &mut OptimizationSummary,
    ) -> Vec<PatchPlan> {
        let mut plans = Vec::new();
        for family in group_families(keys) {
            if family.len() < 2 {
                continue;
            }
            summary.families += 1;
            plans.extend(self.plan_family(&family, summary));
        }
        summary.planned = plans.len();
        plans
    }

    /// Plans one family.
    ///
    /// The first `width` members are targets. A target needs a canonical
    /// descriptor and must not already hold a patch of the chosen format.
    /// It is paired with the first `depth` other members that have a
    /// canonical descriptor, newest first.
    pub fn plan_family(
        &self,
        family: &VersionFamily,
        summary: &mut OptimizationSummary,
    ) -> Vec<PatchPlan> {
        let canonical: Vec<&ArtifactKey> = family
            .members
            .iter()
            .filter(|key| self.has_canonical(key))
            .collect();

        let mut plans = Vec::new();
        for target in family.members.iter().take(self.config.width) {
            summary.candidates += 1;
            if !canonical.contains(&target) {
                debug!(target = %target, "No canonical descriptor, not optimizing");
                continue;
            }
            let strategy = self.strategy_for(target);
            if self.is_optimized(target, strategy) {
                debug!(target = %target, %strategy, "Already optimized");
                summary.skipped_already_optimized += 1;
                continue;
            }
            for predecessor in canonical
                .iter()
                .filter(|key| **key != target)
                .take(self.config.depth)
            {
                plans.push(PatchPlan {
                    target: target.clone(),
                    predecessor: (*predecessor).clone(),
                    strategy,
                });
            }
        }
        info!(family = %family.family, members = family.len(), planned = plans.len(), "Family planned");
        plans
    }

    fn has_canonical(&self, key: &ArtifactKey) -> bool {
        self.repository
            .descriptors(key)
            .iter()
            .any(ArtifactDescriptor::is_canonical)
    }

    fn is_optimized(&self, key: &ArtifactKey, strategy: PatchStrategy) -> bool {
        self.repository
            .descriptors(key)
            .iter()
            .any(|descriptor| descriptor.format() == Some(strategy.format_id()))
    }
}
