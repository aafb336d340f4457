//! End-to-end runs of the controller against in-process collaborators.

#[cfg(test)]
mod tests {
    use crate::config::PipelineConfig;
    use crate::core::{PipelineStatus, StageName, StageOutcome};
    use crate::credentials::{
        CredentialSet, GateDecision, RunCredentials, PUBLISH_SET, REMOTE_ACCESS_SET,
    };
    use crate::errors::PublishError;
    use crate::events::CollectingEventSink;
    use crate::fixtures::{FixtureEntry, FixtureManifest, DEFAULT_EXPECTED_DIGEST};
    use crate::pipeline::{PipelineController, PipelineResult, PipelineState};
    use crate::publish::PublishOutcome;
    use crate::testing::{
        FailingTransport, RecordingPublishClient, ScriptedTestAdapter, StaticTransport,
    };
    use crate::trigger::Trigger;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use tempfile::TempDir;

    const REMOTE: &str = "/data/graphnet/test_data/*";

    // md5("hello\n") = b1946ac92492d2347c6235b4d2611184, and
    // printf 'b1946ac92492d2347c6235b4d2611184' | md5sum
    const HELLO_AGGREGATE: &str = "57ae7aad8abe2f317e460c92d3ed1178";

    struct Harness {
        transport: Arc<dyn crate::fixtures::SecureCopyTransport>,
        adapter: ScriptedTestAdapter,
        client: RecordingPublishClient,
        sink: Arc<CollectingEventSink>,
        workdir: TempDir,
        expected_digest: String,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                transport: Arc::new(
                    StaticTransport::new().with_file(REMOTE, "hello.i3", b"hello\n"),
                ),
                adapter: ScriptedTestAdapter::passing(),
                client: RecordingPublishClient::accepting(),
                sink: Arc::new(CollectingEventSink::new()),
                workdir: tempfile::tempdir().unwrap(),
                expected_digest: HELLO_AGGREGATE.to_string(),
            }
        }

        fn config(&self) -> PipelineConfig {
            let mut config = PipelineConfig::default().with_manifest(FixtureManifest::new(
                vec![FixtureEntry::new(REMOTE, ".")],
                self.expected_digest.clone(),
            ));
            config.tests.coverage_artifact = self.workdir.path().join("coverage.xml");
            config
        }

        fn controller(&self) -> PipelineController {
            self.controller_with(self.config())
        }

        fn controller_with(&self, config: PipelineConfig) -> PipelineController {
            PipelineController::new(
                config,
                Arc::clone(&self.transport),
                Arc::new(self.adapter.clone()),
                Arc::new(self.client.clone()),
            )
            .unwrap()
            .with_event_sink(self.sink.clone())
        }
    }

    fn all_credentials() -> RunCredentials {
        let defaults = RunCredentials::default();
        RunCredentials::new(
            defaults
                .remote_access
                .with_value("HOST", "fixtures.example.org")
                .with_value("USERNAME", "ci")
                .with_value("PASSWORD", "hunter2"),
            defaults.publish.with_value("REPORTER_ID", "token-123"),
        )
    }

    fn outcomes(result: &PipelineResult) -> Vec<StageOutcome> {
        StageName::ALL
            .iter()
            .map(|s| result.outcome(*s).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_data_gate_denied_skips_everything() {
        let transport = StaticTransport::new().with_file(REMOTE, "hello.i3", b"hello\n");
        let mut harness = Harness::new();
        harness.transport = Arc::new(transport.clone());

        let mut credentials = all_credentials();
        credentials.remote_access = credentials.remote_access.with_missing("PASSWORD");
        let result = harness.controller().run(&credentials, Trigger::push()).await;

        assert_eq!(result.status, PipelineStatus::Skipped);
        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.data_gate, Some(GateDecision::Denied));
        assert_eq!(outcomes(&result), vec![StageOutcome::Skipped; 4]);
        assert_eq!(result.final_state(), PipelineState::Done);
        assert_eq!(transport.call_count(), 0);
        assert_eq!(harness.adapter.call_count(), 0);
        assert!(harness.client.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_matching_digest_proceeds_to_tests() {
        let harness = Harness::new();
        let result = harness.controller().run(&all_credentials(), Trigger::push()).await;

        assert_eq!(result.digest.as_deref(), Some(HELLO_AGGREGATE));
        assert_eq!(result.fixture_count, Some(1));
        assert_eq!(result.outcome(StageName::VerifyIntegrity), Some(StageOutcome::Success));
        assert_eq!(harness.adapter.call_count(), 1);
        assert!(result
            .transitions
            .iter()
            .any(|t| {
                t.from == PipelineState::VerifyingIntegrity && t.to == PipelineState::RunningTests
            }));
    }

    #[test]
    fn test_default_manifest_pins_reference_digest() {
        assert_eq!(
            FixtureManifest::default().expected_digest,
            "80006a6d58338eb8ea153d2b7b02c0a1"
        );
        assert_eq!(DEFAULT_EXPECTED_DIGEST, "80006a6d58338eb8ea153d2b7b02c0a1");
    }

    #[tokio::test]
    async fn test_corrupted_fixture_fails_with_both_digests() {
        let mut harness = Harness::new();
        harness.transport =
            Arc::new(StaticTransport::new().with_file(REMOTE, "hello.i3", b"hellO\n"));

        let result = harness.controller().run(&all_credentials(), Trigger::push()).await;

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(result.exit_code(), 1);
        assert_eq!(result.final_state(), PipelineState::Failed);
        assert_eq!(
            outcomes(&result),
            vec![
                StageOutcome::Success,
                StageOutcome::Failed,
                StageOutcome::Skipped,
                StageOutcome::Skipped,
            ]
        );

        let failure = result.failure.as_ref().unwrap();
        assert_eq!(failure.stage, StageName::VerifyIntegrity);
        assert_eq!(failure.kind, "DigestMismatch");
        assert!(failure.message.contains(HELLO_AGGREGATE));

        let record = &result.stages[&StageName::VerifyIntegrity];
        assert_eq!(record.metadata["expected"], HELLO_AGGREGATE);
        let actual = record.metadata["actual"].as_str().unwrap();
        assert_ne!(actual, HELLO_AGGREGATE);
        assert!(failure.message.contains(actual));

        assert_eq!(harness.adapter.call_count(), 0);
        assert!(harness.client.uploads().is_empty());
        assert_eq!(
            result.stages[&StageName::RunTests].skip_reason.as_deref(),
            Some("previous stage failed")
        );
    }

    #[tokio::test]
    async fn test_remote_secrets_in_publish_set_do_not_open_data_gate() {
        let harness = Harness::new();
        let credentials = RunCredentials::new(
            CredentialSet::new(REMOTE_ACCESS_SET),
            CredentialSet::new(PUBLISH_SET)
                .with_value("HOST", "fixtures.example.org")
                .with_value("USERNAME", "ci")
                .with_value("PASSWORD", "hunter2")
                .with_value("REPORTER_ID", "token-123"),
        );

        let result = harness.controller().run(&credentials, Trigger::push()).await;

        assert_eq!(result.status, PipelineStatus::Skipped);
        assert_eq!(result.data_gate, Some(GateDecision::Denied));
        assert_eq!(result.publish_gate, Some(GateDecision::Granted));
        assert_eq!(harness.adapter.call_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_gate_denied_is_success() {
        let harness = Harness::new();
        let mut credentials = all_credentials();
        credentials.publish = credentials.publish.with_missing("REPORTER_ID");

        let result = harness.controller().run(&credentials, Trigger::push()).await;

        assert_eq!(result.status, PipelineStatus::Success);
        assert_eq!(result.data_gate, Some(GateDecision::Granted));
        assert_eq!(result.publish_gate, Some(GateDecision::Denied));
        assert_eq!(result.outcome(StageName::RunTests), Some(StageOutcome::Success));
        assert_eq!(result.outcome(StageName::PublishReport), Some(StageOutcome::Skipped));
        assert!(matches!(result.publish, Some(PublishOutcome::Skipped(_))));
        assert!(harness.client.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_partial() {
        let mut harness = Harness::new();
        harness.client = RecordingPublishClient::failing(PublishError::Transport(
            "connection reset".to_string(),
        ));

        let result = harness.controller().run(&all_credentials(), Trigger::push()).await;

        assert_eq!(result.status, PipelineStatus::Partial);
        assert_eq!(result.exit_code(), 0);
        assert_eq!(result.final_state(), PipelineState::Done);
        assert_eq!(result.outcome(StageName::RunTests), Some(StageOutcome::Success));
        assert_eq!(result.outcome(StageName::PublishReport), Some(StageOutcome::Failed));
        assert!(result.failure.is_none());
        assert_eq!(harness.client.uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_full_success_publishes_report() {
        let harness = Harness::new();
        let result = harness.controller().run(&all_credentials(), Trigger::push()).await;

        assert_eq!(result.status, PipelineStatus::Success);
        assert_eq!(outcomes(&result), vec![StageOutcome::Success; 4]);
        assert_eq!(result.publish, Some(PublishOutcome::Published));

        let coverage = harness.workdir.path().join("coverage.xml");
        assert_eq!(result.coverage_path.as_deref(), Some(coverage.as_path()));
        assert_eq!(harness.client.uploads(), vec![(coverage, "token-123".to_string())]);

        let states: Vec<_> = result.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            states,
            vec![
                PipelineState::FetchingFixtures,
                PipelineState::VerifyingIntegrity,
                PipelineState::RunningTests,
                PipelineState::Publishing,
                PipelineState::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_event_sequence() {
        let harness = Harness::new();
        harness.controller().run(&all_credentials(), Trigger::push()).await;

        let mut expected = vec!["pipeline.started"];
        for _ in StageName::ALL {
            expected.extend(["stage.started", "stage.completed"]);
        }
        expected.push("pipeline.completed");
        assert_eq!(harness.sink.event_types(), expected);
    }

    #[tokio::test]
    async fn test_fetch_failure_stops_before_verification() {
        let transport = FailingTransport::new(REMOTE, "Permission denied (publickey,password)");
        let mut harness = Harness::new();
        harness.transport = Arc::new(transport.clone());

        let result = harness.controller().run(&all_credentials(), Trigger::push()).await;

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(
            outcomes(&result),
            vec![
                StageOutcome::Failed,
                StageOutcome::Skipped,
                StageOutcome::Skipped,
                StageOutcome::Skipped,
            ]
        );
        let failure = result.failure.unwrap();
        assert_eq!(failure.kind, "TransportFailure");
        assert!(failure.message.contains(REMOTE));
        assert!(result.digest.is_none());
        assert_eq!(transport.attempted(), vec![REMOTE]);
        assert_eq!(harness.adapter.call_count(), 0);
        assert_eq!(harness.sink.events_of_type("stage.failed").len(), 1);
    }

    #[tokio::test]
    async fn test_failing_tests_skip_publish() {
        let mut harness = Harness::new();
        harness.adapter = ScriptedTestAdapter::failing(2);

        let result = harness.controller().run(&all_credentials(), Trigger::push()).await;

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(result.failure.as_ref().unwrap().stage, StageName::RunTests);
        assert_eq!(result.failure.as_ref().unwrap().kind, "TestFailure");
        assert_eq!(result.outcome(StageName::PublishReport), Some(StageOutcome::Skipped));
        assert!(harness.client.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_tests_see_verified_fixture_dir() {
        let harness = Harness::new();
        let controller = harness.controller().with_keep_staging(true);
        let result = controller.run(&all_credentials(), Trigger::push()).await;

        let kept = result.kept_staging.clone().unwrap();
        let invocation = &harness.adapter.invocations()[0];
        assert_eq!(invocation.fixture_dir, kept);

        let fixture = kept.join("hello.i3");
        assert_eq!(std::fs::read(&fixture).unwrap(), b"hello\n");
        assert!(std::fs::metadata(&fixture).unwrap().permissions().readonly());
        std::fs::remove_dir_all(kept).unwrap();
    }

    #[tokio::test]
    async fn test_staging_removed_by_default() {
        let harness = Harness::new();
        let result = harness.controller().run(&all_credentials(), Trigger::push()).await;

        assert!(result.kept_staging.is_none());
        let invocation = &harness.adapter.invocations()[0];
        assert!(!invocation.fixture_dir.exists());
    }

    #[tokio::test]
    async fn test_non_primary_pull_request_is_skipped() {
        let transport = StaticTransport::new().with_file(REMOTE, "hello.i3", b"hello\n");
        let mut harness = Harness::new();
        harness.transport = Arc::new(transport.clone());

        let result = harness
            .controller()
            .run(&all_credentials(), Trigger::pull_request("release/1.x"))
            .await;

        assert_eq!(result.status, PipelineStatus::Skipped);
        assert!(result.skip_reason.as_deref().unwrap().contains("release/1.x"));
        assert_eq!(result.data_gate, None);
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_primary_pull_request_runs() {
        let harness = Harness::new();
        let result = harness
            .controller()
            .run(&all_credentials(), Trigger::pull_request("main"))
            .await;
        assert_eq!(result.status, PipelineStatus::Success);
    }

    #[tokio::test]
    async fn test_dirty_staging_dir_fails_fetch() {
        let harness = Harness::new();
        let staging = harness.workdir.path().join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        std::fs::write(staging.join("stale.i3"), b"stale").unwrap();

        let mut config = harness.config();
        config.fetch.staging_dir = Some(staging);
        let result = harness.controller_with(config).run(&all_credentials(), Trigger::push()).await;

        assert_eq!(result.status, PipelineStatus::Failed);
        assert_eq!(result.failure.unwrap().kind, "StagingError");
    }

    #[tokio::test]
    async fn test_result_json_round_trips() {
        let harness = Harness::new();
        let result = harness.controller().run(&all_credentials(), Trigger::push()).await;

        let parsed: PipelineResult = serde_json::from_str(&result.to_json().unwrap()).unwrap();
        assert_eq!(parsed.status, PipelineStatus::Success);
        assert_eq!(parsed.digest, result.digest);
        assert_eq!(parsed.transitions, result.transitions);
    }
}
