//! Stage registry mapping processor ids to stage constructors.

use crate::core::StageKind;
use crate::repository::ArtifactRepository;
use crate::stages::counter::SIZE_COUNTER_ID;
use crate::stages::decompress::GZIP_DECODE_ID;
use crate::stages::{
    ArithmeticOp, ArithmeticStage, DigestAlgorithm, DigestVerifier, GzipDecodeStage,
    PatchApplyStage, PatchGenerateStage, PatchLimits, PatchStrategy, SizeCounter, Stage,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Factory function type for creating stages.
pub type StageFactory = Box<dyn Fn() -> Box<dyn Stage> + Send + Sync>;

struct Registration {
    kind: StageKind,
    factory: StageFactory,
}

/// Registry of stage factories keyed by processor id.
#[derive(Default)]
pub struct StageRegistry {
    registrations: RwLock<HashMap<String, Registration>>,
}

impl StageRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the arithmetic, digest, size and gzip stages.
    #[must_use]
    pub fn with_transform_stages() -> Self {
        let registry = Self::new();
        for op in [ArithmeticOp::Add, ArithmeticOp::Multiply, ArithmeticOp::ShiftLeft] {
            registry.register(op.processor_id(), StageKind::Transform, move || {
                Box::new(ArithmeticStage::new(op))
            });
        }
        for algorithm in [DigestAlgorithm::Md5, DigestAlgorithm::Sha256] {
            registry.register(algorithm.processor_id(), StageKind::Verify, move || {
                Box::new(DigestVerifier::new(algorithm))
            });
        }
        registry.register(SIZE_COUNTER_ID, StageKind::Verify, || Box::new(SizeCounter::new()));
        registry.register(GZIP_DECODE_ID, StageKind::Decode, || Box::new(GzipDecodeStage::new()));
        registry
    }

    /// Creates a registry with every built-in stage, including the patch
    /// stages bound to `repository`.
    #[must_use]
    pub fn with_builtin_stages(repository: Arc<dyn ArtifactRepository>, limits: PatchLimits) -> Self {
        let registry = Self::with_transform_stages();
        for strategy in [PatchStrategy::Raw, PatchStrategy::Archive] {
            let repo = Arc::clone(&repository);
            registry.register(strategy.generate_id(), StageKind::Delta, move || {
                Box::new(PatchGenerateStage::new(strategy, Arc::clone(&repo), limits))
            });
            let repo = Arc::clone(&repository);
            registry.register(strategy.apply_id(), StageKind::Delta, move || {
                Box::new(PatchApplyStage::new(strategy, Arc::clone(&repo), limits))
            });
        }
        registry
    }

    /// Registers a factory, replacing any previous one for the same id.
    pub fn register<F>(&self, processor_id: impl Into<String>, kind: StageKind, factory: F)
    where
        F: Fn() -> Box<dyn Stage> + Send + Sync + 'static,
    {
        self.registrations.write().insert(
            processor_id.into(),
            Registration {
                kind,
                factory: Box::new(factory),
            },
        );
    }

    /// Constructs a fresh stage for the id.
    #[must_use]
    pub fn lookup(&self, processor_id: &str) -> Option<Box<dyn Stage>> {
        self.registrations
            .read()
            .get(processor_id)
            .map(|registration| (registration.factory)())
    }

    /// Returns the kind registered for the id.
    #[must_use]
    pub fn kind_of(&self, processor_id: &str) -> Option<StageKind> {
        self.registrations.read().get(processor_id).map(|r| r.kind)
    }

    /// Returns true if the id is registered.
    #[must_use]
    pub fn contains(&self, processor_id: &str) -> bool {
        self.registrations.read().contains_key(processor_id)
    }

    /// Lists registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.registrations.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl fmt::Debug for StageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use crate::stages::UnresolvedStage;

    #[test]
    fn test_transform_stages_registered() {
        let registry = StageRegistry::with_transform_stages();

        assert!(registry.contains("transform.add"));
        assert!(registry.contains("verify.md5"));
        assert!(registry.contains("count.size"));
        assert_eq!(registry.kind_of("decode.gzip"), Some(StageKind::Decode));
        assert!(!registry.contains("delta.bsdiff.generate"));
    }

    #[test]
    fn test_builtin_stages_include_patches() {
        let repo: Arc<dyn ArtifactRepository> = Arc::new(InMemoryRepository::new());
        let registry = StageRegistry::with_builtin_stages(repo, PatchLimits::default());

        for id in [
            "delta.bsdiff.generate",
            "delta.bsdiff.apply",
            "delta.bsdiff-zip.generate",
            "delta.bsdiff-zip.apply",
        ] {
            assert_eq!(registry.kind_of(id), Some(StageKind::Delta), "{id}");
        }
    }

    #[test]
    fn test_lookup_builds_fresh_instances() {
        let registry = StageRegistry::new();
        registry.register("custom", StageKind::Transform, || Box::new(UnresolvedStage::new("custom")));

        assert!(registry.lookup("custom").is_some());
        assert!(registry.lookup("custom").is_some());
        assert!(registry.lookup("missing").is_none());
        assert_eq!(registry.ids(), vec!["custom".to_string()]);
    }
}
