//! The state machine that drives a run.

use super::result::{FailureSummary, PipelineResult};
use super::state::PipelineState;
use crate::config::PipelineConfig;
use crate::core::{StageName, StageRecord};
use crate::credentials::{
    ConnectionCredentials, CredentialGate, GateDecision, PublishCredentials, RunCredentials,
};
use crate::errors::{CiflowError, ConfigError, FetchError, IntegrityError, TestFailure};
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::fixtures::{FixtureFetcher, ScpTransport, SecureCopyTransport, StagingArea};
use crate::integrity::IntegrityVerifier;
use crate::publish::{PublishClient, PublishOutcome, ReportPublisher, UnavailablePublishClient};
use crate::runner::{CommandTestAdapter, CoverageReport, TestFrameworkAdapter, TestRunner};
use crate::runtime::budget_from_secs;
use crate::trigger::Trigger;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

const AFTER_FAILURE: &str = "previous stage failed";

/// Runs fetch, verify, test and publish as one gated sequence.
pub struct PipelineController {
    config: PipelineConfig,
    fetcher: FixtureFetcher,
    verifier: IntegrityVerifier,
    runner: TestRunner,
    publisher: ReportPublisher,
    sink: Arc<dyn EventSink>,
    keep_staging: bool,
}

impl std::fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineController")
            .field("pipeline", &self.config.name)
            .field("fetcher", &self.fetcher)
            .field("runner", &self.runner)
            .field("keep_staging", &self.keep_staging)
            .finish_non_exhaustive()
    }
}

/// Mutable state of one run. Owns the staging area.
struct Run {
    result: PipelineResult,
    connection: Option<ConnectionCredentials>,
    publish_credentials: Option<PublishCredentials>,
    publish_gate: GateDecision,
    staging: Option<StagingArea>,
    verified_dir: Option<PathBuf>,
    report: Option<CoverageReport>,
}

impl Run {
    fn new(result: PipelineResult) -> Self {
        Self {
            result,
            connection: None,
            publish_credentials: None,
            publish_gate: GateDecision::Denied,
            staging: None,
            verified_dir: None,
            report: None,
        }
    }
}

impl PipelineController {
    /// Creates a controller with explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` does not validate.
    pub fn new(
        config: PipelineConfig,
        transport: Arc<dyn SecureCopyTransport>,
        adapter: Arc<dyn TestFrameworkAdapter>,
        client: Arc<dyn PublishClient>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let verifier = IntegrityVerifier::for_manifest(&config.manifest)?;
        let fetcher = FixtureFetcher::new(transport)
            .with_concurrency(config.fetch.concurrency)
            .with_timeout(budget_from_secs(config.fetch.timeout_secs));
        let runner = TestRunner::new(adapter)
            .with_artifact(&config.tests.coverage_artifact, config.tests.coverage_format)
            .with_timeout(budget_from_secs(config.tests.timeout_secs));

        Ok(Self {
            config,
            fetcher,
            verifier,
            runner,
            publisher: ReportPublisher::new(client),
            sink: Arc::new(NoOpEventSink),
            keep_staging: false,
        })
    }

    /// Creates a controller using `scp`, the configured test commands and,
    /// when available, the HTTP publish client.
    ///
    /// `commit` identifies the revision the coverage is reported against.
    pub fn from_config(config: PipelineConfig, commit: Option<&str>) -> Result<Self, ConfigError> {
        let transport = Arc::new(ScpTransport::new(config.trust.clone()));
        let adapter = Arc::new(
            CommandTestAdapter::new(config.tests.commands.clone())
                .with_env(config.tests.env.clone()),
        );
        let client = default_publish_client(&config, commit);
        Self::new(config, transport, adapter, client)
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Leaves the staging area on disk after the run.
    #[must_use]
    pub fn with_keep_staging(mut self, keep: bool) -> Self {
        self.keep_staging = keep;
        self
    }

    /// The validated configuration.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Executes one run.
    ///
    /// `credentials` is the start-up snapshot of both gated credential sets.
    /// Failures are reported in the result, never as `Err`.
    pub async fn run(&self, credentials: &RunCredentials, trigger: Trigger) -> PipelineResult {
        let mut run = Run::new(PipelineResult::begin(&self.config.name, trigger));

        info!(
            pipeline = %self.config.name,
            run_id = %run.result.run_id,
            trigger = %run.result.trigger,
            "Pipeline started"
        );
        self.sink
            .emit(&PipelineEvent::PipelineStarted {
                run_id: run.result.run_id,
                pipeline: self.config.name.clone(),
                trigger: run.result.trigger.clone(),
            })
            .await;

        let mut state = PipelineState::PendingGates;
        while !state.is_terminal() {
            let next = match state {
                PipelineState::PendingGates => self.evaluate_gates(&mut run, credentials).await,
                PipelineState::FetchingFixtures => self.fetch(&mut run).await,
                PipelineState::VerifyingIntegrity => self.verify(&mut run).await,
                PipelineState::RunningTests => self.run_tests(&mut run).await,
                PipelineState::Publishing => self.publish(&mut run).await,
                PipelineState::Done | PipelineState::Failed => break,
            };
            debug_assert!(state.can_transition_to(next), "{state} -> {next}");
            info!(from = %state, to = %next, "Pipeline transition");
            run.result.transition(state, next);
            state = next;
        }

        if state == PipelineState::Failed {
            self.skip_remaining(&mut run, AFTER_FAILURE).await;
        }

        if let Some(mut staging) = run.staging.take() {
            if self.keep_staging {
                staging.keep();
                run.result.kept_staging = Some(staging.root().to_path_buf());
            }
        }

        run.result.finish();
        info!(
            pipeline = %self.config.name,
            run_id = %run.result.run_id,
            status = %run.result.status,
            duration_ms = run.result.duration_ms,
            "Pipeline completed"
        );
        self.sink
            .emit(&PipelineEvent::PipelineCompleted {
                run_id: run.result.run_id,
                status: run.result.status,
                duration_ms: run.result.duration_ms,
            })
            .await;
        run.result
    }

    async fn evaluate_gates(&self, run: &mut Run, credentials: &RunCredentials) -> PipelineState {
        if let Some(reason) = run.result.trigger.ineligibility(&self.config.primary_branch) {
            info!(reason = %reason, "Trigger not eligible; skipping run");
            run.result.skip_reason = Some(reason.clone());
            self.skip_remaining(run, &reason).await;
            return PipelineState::Done;
        }

        let keys = &self.config.credentials;
        let data_gate =
            CredentialGate::evaluate(&keys.remote_access(), &credentials.remote_access);
        let publish_gate = CredentialGate::evaluate(&keys.publish(), &credentials.publish);
        run.result.data_gate = Some(data_gate);
        run.result.publish_gate = Some(publish_gate);
        run.publish_gate = publish_gate;
        if publish_gate.is_granted() {
            run.publish_credentials = PublishCredentials::from_set(&credentials.publish, keys);
        }

        let connection = if data_gate.is_granted() {
            ConnectionCredentials::from_set(&credentials.remote_access, keys)
        } else {
            None
        };
        match connection {
            Some(connection) => {
                run.connection = Some(connection);
                PipelineState::FetchingFixtures
            }
            None => {
                let reason = "remote-access credentials not present";
                run.result.skip_reason = Some(reason.to_string());
                self.skip_remaining(run, reason).await;
                PipelineState::Done
            }
        }
    }

    async fn fetch(&self, run: &mut Run) -> PipelineState {
        let stage = StageName::FetchFixtures;
        let started = self.start_stage(stage).await;

        let staging = match &self.config.fetch.staging_dir {
            Some(dir) => StagingArea::at(dir),
            None => StagingArea::ephemeral(),
        };
        let staging = match staging {
            Ok(staging) => run.staging.insert(staging),
            Err(e) => return self.fail_stage(run, stage, e.into(), started).await,
        };
        let Some(auth) = &run.connection else {
            let err = FetchError::Staging("no connection credentials".to_string());
            return self.fail_stage(run, stage, err.into(), started).await;
        };

        let fetched = self.fetcher.fetch(&self.config.manifest, staging, auth).await;
        match fetched {
            Ok(()) => {
                let record = StageRecord::success(stage).add_metadata(
                    "entries",
                    serde_json::json!(self.config.manifest.entries.len()),
                );
                self.complete_stage(run, record, started).await;
                PipelineState::VerifyingIntegrity
            }
            Err(e) => self.fail_stage(run, stage, e.into(), started).await,
        }
    }

    async fn verify(&self, run: &mut Run) -> PipelineState {
        let stage = StageName::VerifyIntegrity;
        let started = self.start_stage(stage).await;

        let Some(root) = run.staging.as_ref().map(|s| s.root().to_path_buf()) else {
            let err = IntegrityError::NoFixturesFound {
                root: "<no staging area>".to_string(),
            };
            return self.fail_stage(run, stage, err.into(), started).await;
        };

        let verifier = self.verifier.clone();
        let expected = self.config.manifest.expected_digest.clone();
        let blocking_root = root.clone();
        let verified =
            tokio::task::spawn_blocking(move || verifier.verify_dir(&blocking_root, &expected))
                .await
                .unwrap_or_else(|e| {
                    Err(IntegrityError::Io {
                        path: root.display().to_string(),
                        message: format!("verification task failed: {e}"),
                    })
                });

        let summary = match verified {
            Ok(summary) => summary,
            Err(e) => return self.fail_stage(run, stage, e.into(), started).await,
        };

        if let Some(staging) = &run.staging {
            if let Err(e) = staging.seal() {
                let err = IntegrityError::io(root.display().to_string(), &e);
                return self.fail_stage(run, stage, err.into(), started).await;
            }
        }

        run.verified_dir = Some(root);
        run.result.digest = Some(summary.aggregate.clone());
        run.result.fixture_count = Some(summary.records.len());
        let record = StageRecord::success(stage)
            .add_metadata("digest", serde_json::json!(summary.aggregate))
            .add_metadata("files", serde_json::json!(summary.records.len()));
        self.complete_stage(run, record, started).await;
        PipelineState::RunningTests
    }

    async fn run_tests(&self, run: &mut Run) -> PipelineState {
        let stage = StageName::RunTests;
        let started = self.start_stage(stage).await;

        let Some(fixture_dir) = run.verified_dir.clone() else {
            return self
                .fail_stage(run, stage, TestFailure::FixturesUnverified.into(), started)
                .await;
        };

        let tests = &self.config.tests;
        let outcome = self
            .runner
            .run(&tests.source_root, &tests.test_root, &fixture_dir)
            .await;
        match outcome {
            Ok(report) => {
                run.result.coverage_path = Some(report.path.clone());
                let record = StageRecord::success(stage)
                    .add_metadata("coverage", serde_json::json!(report.path.display().to_string()));
                run.report = Some(report);
                self.complete_stage(run, record, started).await;
                PipelineState::Publishing
            }
            Err(e) => self.fail_stage(run, stage, e.into(), started).await,
        }
    }

    async fn publish(&self, run: &mut Run) -> PipelineState {
        let stage = StageName::PublishReport;
        let Some(report) = run.report.clone() else {
            self.skip_stage(run, stage, "no coverage report").await;
            return PipelineState::Done;
        };
        if !run.publish_gate.is_granted() {
            let reason = "publish credentials not present";
            info!(stage = %stage, "{reason}; skipping");
            run.result.publish = Some(PublishOutcome::Skipped(reason.to_string()));
            self.skip_stage(run, stage, reason).await;
            return PipelineState::Done;
        }

        let started = self.start_stage(stage).await;
        let outcome = self
            .publisher
            .publish(&report, run.publish_gate, run.publish_credentials.as_ref())
            .await;
        match outcome {
            Ok(PublishOutcome::Published) => {
                run.result.publish = Some(PublishOutcome::Published);
                self.complete_stage(run, StageRecord::success(stage), started).await;
            }
            Ok(PublishOutcome::Skipped(reason)) => {
                run.result.publish = Some(PublishOutcome::Skipped(reason.clone()));
                self.skip_stage(run, stage, &reason).await;
            }
            Err(e) => {
                let err = CiflowError::from(e);
                warn!(stage = %stage, error = %err, "Coverage publish failed; run is partial");
                self.record_failure(run, stage, &err, started, false).await;
            }
        }
        PipelineState::Done
    }

    async fn start_stage(&self, stage: StageName) -> Instant {
        info!(stage = %stage, "Stage started");
        self.sink.emit(&PipelineEvent::StageStarted { stage }).await;
        Instant::now()
    }

    async fn complete_stage(&self, run: &mut Run, record: StageRecord, started: Instant) {
        let duration_ms = elapsed_ms(started);
        let stage = record.stage;
        info!(stage = %stage, duration_ms, "Stage completed");
        run.result.record(record.with_duration_ms(duration_ms));
        self.sink
            .emit(&PipelineEvent::StageCompleted { stage, duration_ms })
            .await;
    }

    async fn skip_stage(&self, run: &mut Run, stage: StageName, reason: &str) {
        run.result.record(StageRecord::skipped(stage, reason));
        self.sink
            .emit(&PipelineEvent::StageSkipped {
                stage,
                reason: reason.to_string(),
            })
            .await;
    }

    async fn skip_remaining(&self, run: &mut Run, reason: &str) {
        for stage in run.result.skip_remaining(reason) {
            self.sink
                .emit(&PipelineEvent::StageSkipped {
                    stage,
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    async fn fail_stage(
        &self,
        run: &mut Run,
        stage: StageName,
        err: CiflowError,
        started: Instant,
    ) -> PipelineState {
        error!(stage = %stage, kind = err.kind(), error = %err, "Stage failed");
        self.record_failure(run, stage, &err, started, true).await;
        PipelineState::Failed
    }

    async fn record_failure(
        &self,
        run: &mut Run,
        stage: StageName,
        err: &CiflowError,
        started: Instant,
        fatal: bool,
    ) {
        let message = err.to_string();
        let mut record = StageRecord::failed(stage, err.kind(), &message)
            .with_duration_ms(elapsed_ms(started));
        for (key, value) in err.to_dict() {
            if key != "type" && key != "message" {
                record = record.add_metadata(key, value);
            }
        }
        run.result.record(record);
        if fatal && run.result.failure.is_none() {
            run.result.failure = Some(FailureSummary {
                stage,
                kind: err.kind().to_string(),
                message: message.clone(),
            });
        }
        self.sink
            .emit(&PipelineEvent::StageFailed {
                stage,
                kind: err.kind().to_string(),
                error: message,
            })
            .await;
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(feature = "http-publish")]
fn default_publish_client(config: &PipelineConfig, commit: Option<&str>) -> Arc<dyn PublishClient> {
    use crate::publish::HttpPublishClient;

    let Some(commit) = commit.filter(|c| !c.trim().is_empty()) else {
        return Arc::new(UnavailablePublishClient::new(
            "no commit to report coverage against; set GITHUB_SHA or --commit",
        ));
    };
    match HttpPublishClient::new(
        &config.publish.endpoint,
        commit,
        &config.publish.language,
        budget_from_secs(config.publish.timeout_secs),
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => Arc::new(UnavailablePublishClient::new(e.to_string())),
    }
}

#[cfg(not(feature = "http-publish"))]
fn default_publish_client(
    _config: &PipelineConfig,
    _commit: Option<&str>,
) -> Arc<dyn PublishClient> {
    Arc::new(UnavailablePublishClient::new(
        "ciflow was built without the http-publish feature",
    ))
}
