//! End-to-end tests for chains built from descriptors.

#[cfg(test)]
mod tests {
    use crate::core::{
        properties, ArtifactDescriptor, ArtifactKey, Severity, StageDescriptor, StageKind, Version,
    };
    use crate::errors::ArtiflowError;
    use crate::pipeline::{PipelineFactory, StageRegistry};
    use crate::repository::{ArtifactRepository, InMemoryRepository};
    use crate::stages::{DigestAlgorithm, DigestVerifier, PatchLimits, PatchStrategy};
    use crate::testing::fixtures::{foreign_jar, sample_jar_version};
    use crate::testing::{
        assert_child_count, assert_severity, assert_status_mentions, RecordingSink, ScriptedStage,
    };
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::sync::Arc;

    const TEST_MD5: &str = "0cbc6611f5540bd0809a388dc95a615b";

    fn key(version: u32) -> ArtifactKey {
        ArtifactKey::new("ns", "osgi.bundle", "org.example", Version::new(version, 0, 0))
    }

    fn context() -> ArtifactDescriptor {
        ArtifactDescriptor::new(key(1))
    }

    fn transform_factory() -> PipelineFactory {
        PipelineFactory::new(Arc::new(StageRegistry::with_transform_stages()))
    }

    fn step(id: &str, data: &str) -> StageDescriptor {
        StageDescriptor::new(id).with_data(data).required()
    }

    fn run(steps: &[StageDescriptor], input: &[u8]) -> (Vec<u8>, crate::core::Outcome) {
        let mut pipeline = transform_factory().create_and_link(steps, &context(), Vec::new());
        pipeline.write_all(input).unwrap();
        pipeline.close().unwrap();
        let status = pipeline.status(true);
        (pipeline.into_sink(), status)
    }

    #[test]
    fn test_multiply_then_add() {
        let (out, status) = run(
            &[step("transform.multiply", "2"), step("transform.add", "1")],
            &[1, 2, 3, 4, 5],
        );
        assert_eq!(out, vec![3, 5, 7, 9, 11]);
        assert!(status.is_ok());
    }

    #[test]
    fn test_add_then_multiply() {
        let (out, _) = run(
            &[step("transform.add", "1"), step("transform.multiply", "2")],
            &[1, 2, 3, 4, 5],
        );
        assert_eq!(out, vec![4, 6, 8, 10, 12]);
    }

    #[test]
    fn test_md5_verifier_accepts_correct_digest() {
        let (out, status) = run(&[step("verify.md5", TEST_MD5)], b"Test");
        assert_eq!(out, b"Test");
        assert_severity(&status, Severity::Ok);
    }

    #[test]
    fn test_md5_verifier_reports_wrong_digest() {
        let wrong = "ffffffffffffffffffffffffffffffff";
        let (out, status) = run(&[step("verify.md5", wrong)], b"Test");

        assert_eq!(out, b"Test");
        assert_severity(&status, Severity::Error);
        assert_status_mentions(&status.children[0], TEST_MD5);
        assert_status_mentions(&status.children[0], wrong);
    }

    #[test]
    fn test_shift_then_verify_shifted_digest() {
        let shifted: Vec<u8> = b"Test".iter().map(|b| b << 1).collect();
        let digest = DigestVerifier::digest_hex(DigestAlgorithm::Md5, &shifted);

        let (out, status) = run(&[step("transform.shift", "1"), step("verify.md5", &digest)], b"Test");
        assert_eq!(out, shifted);
        assert!(status.is_ok(), "{status}");
    }

    #[test]
    fn test_verify_raw_digest_before_shift_is_order_sensitive() {
        let shifted: Vec<u8> = b"Test".iter().map(|b| b << 1).collect();
        let digest = DigestVerifier::digest_hex(DigestAlgorithm::Md5, &shifted);

        let (out, status) = run(&[step("verify.md5", &digest), step("transform.shift", "1")], b"Test");
        assert_eq!(out, shifted);
        assert_severity(&status, Severity::Error);
        assert_severity(&status.children[0], Severity::Error);
        assert_severity(&status.children[1], Severity::Ok);
    }

    #[test]
    fn test_unresolved_optional_step_does_not_block() {
        let factory = transform_factory();
        let optional = context().with_processing_steps(vec![StageDescriptor::new("no.such.stage")]);
        let required =
            context().with_processing_steps(vec![StageDescriptor::new("no.such.stage").required()]);

        assert!(factory.can_process(&optional));
        assert!(!factory.can_process(&required));
    }

    #[test]
    fn test_deep_status_with_failing_middle_stage() {
        let registry = StageRegistry::new();
        registry.register("ok", StageKind::Transform, || Box::new(ScriptedStage::new()));
        registry.register("bad", StageKind::Verify, || {
            Box::new(ScriptedStage::new().with_close_outcome(crate::core::Outcome::error("mismatch")))
        });
        let factory = PipelineFactory::new(Arc::new(registry));
        let steps = [StageDescriptor::new("ok"), StageDescriptor::new("bad"), StageDescriptor::new("ok")];

        let mut pipeline = factory.create_and_link(&steps, &context(), Vec::new());
        pipeline.write_all(b"payload").unwrap();
        pipeline.close().unwrap();

        let deep = pipeline.status(true);
        assert_severity(&deep, Severity::Error);
        assert_child_count(&deep, 3);
        assert_severity(&pipeline.status(false), Severity::Ok);
        assert_child_count(&pipeline.error_status(), 1);
        assert!(matches!(pipeline.check_status(), Err(ArtiflowError::Status(_))));
    }

    #[test]
    fn test_duplicate_delta_steps_rejected() {
        let repo: Arc<dyn ArtifactRepository> = Arc::new(InMemoryRepository::new());
        let factory = PipelineFactory::new(Arc::new(StageRegistry::with_builtin_stages(
            repo,
            PatchLimits::default(),
        )));
        let predecessor = key(1).to_external_form();
        let descriptor = ArtifactDescriptor::new(key(2)).with_processing_steps(vec![
            StageDescriptor::new("delta.bsdiff.apply").with_data(predecessor.clone()),
            StageDescriptor::new("delta.bsdiff-zip.apply").with_data(predecessor),
        ]);

        assert!(!factory.can_process(&descriptor));
    }

    #[test]
    fn test_close_is_idempotent_through_factory() {
        let sink = RecordingSink::new();
        let mut pipeline =
            transform_factory().create_and_link(&[step("transform.add", "3")], &context(), sink.clone());
        pipeline.write_all(&[1]).unwrap();
        pipeline.close().unwrap();
        pipeline.close().unwrap();

        assert_eq!(sink.contents(), vec![4]);
        assert_eq!(sink.flush_count(), 1);
    }

    fn patch_factory(repo: &InMemoryRepository) -> PipelineFactory {
        let shared: Arc<dyn ArtifactRepository> = Arc::new(repo.clone());
        PipelineFactory::new(Arc::new(StageRegistry::with_builtin_stages(
            shared,
            PatchLimits::default(),
        )))
    }

    fn generate_patch(factory: &PipelineFactory, strategy: PatchStrategy, new: &[u8]) -> Vec<u8> {
        let mut generate = factory.create_and_link(
            &[step(strategy.generate_id(), &key(1).to_external_form())],
            &ArtifactDescriptor::new(key(2)),
            Vec::new(),
        );
        generate.write_all(new).unwrap();
        generate.close().unwrap();
        generate.check_status().unwrap();
        generate.into_sink()
    }

    fn patch_round_trip(strategy: PatchStrategy, old: Vec<u8>, new: Vec<u8>) {
        let repo = InMemoryRepository::new();
        repo.add_canonical(key(1), old);
        repo.add_canonical(key(2), new.clone());
        let factory = patch_factory(&repo);
        let patch = generate_patch(&factory, strategy, &new);

        let stored = ArtifactDescriptor::new(key(2))
            .with_property(properties::FORMAT, strategy.format_id())
            .with_processing_steps(vec![step(strategy.apply_id(), &key(1).to_external_form())]);
        repo.add_descriptor(stored.clone(), patch);

        assert!(factory.can_process(&stored));
        let restored = factory
            .process(&stored, &repo.raw_bytes(&stored).unwrap(), Vec::new())
            .unwrap();
        assert_eq!(restored, new);
    }

    #[test]
    fn test_archive_restore_of_other_writer_jar_fails_digest_check() {
        let (old, new) = (foreign_jar(1, 1), foreign_jar(2, 1));
        let repo = InMemoryRepository::new();
        repo.add_canonical(key(1), old);
        let canonical = repo.add_canonical(key(2), new.clone());
        let factory = patch_factory(&repo);
        let strategy = PatchStrategy::Archive;
        let patch = generate_patch(&factory, strategy, &new);

        let stored = ArtifactDescriptor::new(key(2))
            .with_property(
                properties::ARTIFACT_MD5,
                canonical.property(properties::ARTIFACT_MD5).unwrap(),
            )
            .with_processing_steps(vec![
                step(strategy.apply_id(), &key(1).to_external_form()),
                step("verify.md5", "artifact"),
            ]);

        let err = factory.process(&stored, &patch, Vec::new()).unwrap_err();
        let ArtiflowError::Status(status) = err else {
            panic!("expected a status error, got {err}");
        };
        assert_child_count(&status, 1);
        assert_status_mentions(&status.children[0], "verify.md5 mismatch");
    }

    #[test]
    fn test_raw_patch_round_trip_through_repository() {
        let old: Vec<u8> = (0..4096u32).map(|i| (i % 253) as u8).collect();
        let mut new = old.clone();
        new[100..110].copy_from_slice(b"0123456789");
        new.extend_from_slice(b"tail");
        patch_round_trip(PatchStrategy::Raw, old, new);
    }

    #[test]
    fn test_archive_patch_round_trip_through_repository() {
        patch_round_trip(PatchStrategy::Archive, sample_jar_version(1), sample_jar_version(3));
    }

    #[test]
    fn test_apply_with_missing_predecessor_is_hard_error() {
        let repo: Arc<dyn ArtifactRepository> = Arc::new(InMemoryRepository::new());
        let factory = PipelineFactory::new(Arc::new(StageRegistry::with_builtin_stages(
            repo,
            PatchLimits::default(),
        )));
        let stored = ArtifactDescriptor::new(key(2))
            .with_processing_steps(vec![step("delta.bsdiff.apply", &key(1).to_external_form())]);

        let err = factory.process(&stored, b"not really a patch", Vec::new()).unwrap_err();
        assert!(matches!(err, ArtiflowError::Repository { .. }));
    }
}
