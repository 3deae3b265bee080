//! Building chains from stage descriptors.

use super::chain::{Pipeline, StageHandle};
use super::registry::StageRegistry;
use crate::core::{ArtifactDescriptor, StageDescriptor, StageKind};
use crate::errors::Result;
use crate::stages::{Stage, UnresolvedStage};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

/// Creates and links stage chains using a [`StageRegistry`].
#[derive(Debug, Clone)]
pub struct PipelineFactory {
    registry: Arc<StageRegistry>,
}

impl PipelineFactory {
    /// Creates a factory backed by `registry`.
    #[must_use]
    pub fn new(registry: Arc<StageRegistry>) -> Self {
        Self { registry }
    }

    /// The registry used to resolve processor ids.
    #[must_use]
    pub fn registry(&self) -> &Arc<StageRegistry> {
        &self.registry
    }

    /// Instantiates and initializes one stage per descriptor, in order.
    ///
    /// Unknown ids become disabled placeholders carrying a config problem
    /// status instead of aborting construction.
    #[must_use]
    pub fn create(
        &self,
        descriptors: &[StageDescriptor],
        context: &ArtifactDescriptor,
    ) -> Vec<StageHandle> {
        descriptors
            .iter()
            .map(|descriptor| self.create_one(descriptor, context))
            .collect()
    }

    fn create_one(&self, descriptor: &StageDescriptor, context: &ArtifactDescriptor) -> StageHandle {
        let id = descriptor.processor_id.as_str();
        let kind = self.registry.kind_of(id);
        let mut stage: Box<dyn Stage> = match self.registry.lookup(id) {
            Some(stage) => stage,
            None => Box::new(UnresolvedStage::new(id)),
        };
        let status = stage.initialize(descriptor, context);
        debug!(
            processor_id = id,
            required = descriptor.required,
            enabled = stage.is_enabled(),
            severity = %status.severity,
            "Stage initialized"
        );
        StageHandle::new(id, descriptor.required, kind, stage, status)
    }

    /// Returns the reason the descriptor's processing steps cannot run, or
    /// `None` if they can.
    ///
    /// Performs no I/O beyond what stage initialization reads from the
    /// context.
    #[must_use]
    pub fn check_descriptors(&self, descriptor: &ArtifactDescriptor) -> Option<String> {
        let mut exclusive_kinds: HashSet<StageKind> = HashSet::new();
        for step in &descriptor.processing_steps {
            let id = step.processor_id.as_str();
            let Some(kind) = self.registry.kind_of(id) else {
                if step.required {
                    return Some(format!("required processing step '{id}' is not registered"));
                }
                continue;
            };
            if kind.is_exclusive() && !exclusive_kinds.insert(kind) {
                return Some(format!("more than one {kind} step declared ('{id}')"));
            }
            if step.required {
                let handle = self.create_one(step, descriptor);
                if !handle.is_enabled() {
                    return Some(format!(
                        "required processing step '{id}' is disabled: {}",
                        handle.status()
                    ));
                }
            }
        }
        None
    }

    /// Returns true if the descriptor's processing steps can be run.
    #[must_use]
    pub fn can_process(&self, descriptor: &ArtifactDescriptor) -> bool {
        match self.check_descriptors(descriptor) {
            None => true,
            Some(reason) => {
                warn!(key = %descriptor.key, reason = %reason, "Cannot process artifact");
                false
            }
        }
    }

    /// Links already created stages in front of `sink`.
    pub fn link<W: Write>(&self, stages: Vec<StageHandle>, sink: W) -> Pipeline<W> {
        Pipeline::new(stages, sink)
    }

    /// Creates the stages for `descriptors` and links them in front of
    /// `sink`.
    pub fn create_and_link<W: Write>(
        &self,
        descriptors: &[StageDescriptor],
        context: &ArtifactDescriptor,
        sink: W,
    ) -> Pipeline<W> {
        self.link(self.create(descriptors, context), sink)
    }

    /// Runs `bytes` through the descriptor's own processing steps into
    /// `sink`, closes the chain and checks its status.
    ///
    /// This is how a stored representation is turned back into canonical
    /// bytes.
    pub fn process<W: Write>(
        &self,
        descriptor: &ArtifactDescriptor,
        bytes: &[u8],
        sink: W,
    ) -> Result<W> {
        let mut pipeline = self.create_and_link(&descriptor.processing_steps, descriptor, sink);
        pipeline.process(bytes)?;
        pipeline.close()?;
        pipeline.check_status()?;
        Ok(pipeline.into_sink())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ArtifactKey, Severity, Version};
    use crate::testing::ScriptedStage;

    fn context(steps: Vec<StageDescriptor>) -> ArtifactDescriptor {
        ArtifactDescriptor::new(ArtifactKey::new("ns", "binary", "tool", Version::new(1, 0, 0)))
            .with_processing_steps(steps)
    }

    fn factory() -> PipelineFactory {
        PipelineFactory::new(Arc::new(StageRegistry::with_transform_stages()))
    }

    #[test]
    fn test_create_resolves_in_order() {
        let steps = vec![
            StageDescriptor::new("transform.add").with_data("1"),
            StageDescriptor::new("no.such.stage"),
        ];
        let stages = factory().create(&steps, &context(Vec::new()));

        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].processor_id(), "transform.add");
        assert!(stages[0].is_resolved());
        assert!(!stages[1].is_resolved());
        assert_eq!(stages[1].status().severity, Severity::Info);
    }

    #[test]
    fn test_can_process_rejects_disabled_required_stage() {
        let factory = factory();
        let bad = context(vec![StageDescriptor::new("transform.add").with_data("abc").required()]);
        let optional = context(vec![StageDescriptor::new("transform.add").with_data("abc")]);

        assert!(!factory.can_process(&bad));
        assert!(factory.can_process(&optional));
    }

    #[test]
    fn test_exclusive_kind_detected() {
        let registry = StageRegistry::new();
        registry.register("delta.a", StageKind::Delta, || Box::new(ScriptedStage::new()));
        registry.register("delta.b", StageKind::Delta, || Box::new(ScriptedStage::new()));
        let factory = PipelineFactory::new(Arc::new(registry));

        let descriptor = context(vec![StageDescriptor::new("delta.a"), StageDescriptor::new("delta.b")]);
        let reason = factory.check_descriptors(&descriptor).unwrap();
        assert!(reason.contains("delta"), "{reason}");
    }

    #[test]
    fn test_process_runs_descriptor_steps() {
        let descriptor = context(vec![StageDescriptor::new("transform.add").with_data("1").required()]);
        let out = factory().process(&descriptor, &[1, 2, 3], Vec::new()).unwrap();
        assert_eq!(out, vec![2, 3, 4]);
    }
}
