//! Terminal record of a run.

use super::state::{PipelineState, StateTransition};
use crate::core::{PipelineStatus, StageName, StageOutcome, StageRecord};
use crate::credentials::GateDecision;
use crate::publish::PublishOutcome;
use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use uuid::Uuid;

/// The first fatal failure of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureSummary {
    /// Stage that failed.
    pub stage: StageName,
    /// Error kind tag, e.g. `DigestMismatch`.
    pub kind: String,
    /// Error message.
    pub message: String,
}

/// Everything a finished run reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Run identifier.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// What started the run.
    pub trigger: Trigger,
    /// Overall status.
    pub status: PipelineStatus,
    /// Why the whole run was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    /// Remote-access gate, if evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_gate: Option<GateDecision>,
    /// Publish gate, if evaluated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_gate: Option<GateDecision>,
    /// One record per stage.
    pub stages: BTreeMap<StageName, StageRecord>,
    /// State changes in order.
    pub transitions: Vec<StateTransition>,
    /// Verified aggregate digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Number of fixture files covered by the digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture_count: Option<usize>,
    /// Coverage artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_path: Option<PathBuf>,
    /// Publish step result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish: Option<PublishOutcome>,
    /// Staging directory left in place for inspection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kept_staging: Option<PathBuf>,
    /// First fatal failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureSummary>,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration_ms: f64,
}

impl PipelineResult {
    /// Starts a result for a new run.
    #[must_use]
    pub fn begin(pipeline: impl Into<String>, trigger: Trigger) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            trigger,
            status: PipelineStatus::Skipped,
            skip_reason: None,
            data_gate: None,
            publish_gate: None,
            stages: BTreeMap::new(),
            transitions: Vec::new(),
            digest: None,
            fixture_count: None,
            coverage_path: None,
            publish: None,
            kept_staging: None,
            failure: None,
            started_at: now,
            finished_at: now,
            duration_ms: 0.0,
        }
    }

    /// Stores a stage record, replacing any earlier one for that stage.
    pub fn record(&mut self, record: StageRecord) {
        self.stages.insert(record.stage, record);
    }

    /// Appends a state change.
    pub fn transition(&mut self, from: PipelineState, to: PipelineState) {
        self.transitions.push(StateTransition { from, to });
    }

    /// Records every stage without a record as skipped with `reason`.
    ///
    /// Returns the stages it skipped, in pipeline order.
    pub fn skip_remaining(&mut self, reason: &str) -> Vec<StageName> {
        let mut skipped = Vec::new();
        for stage in StageName::ALL {
            if let Entry::Vacant(slot) = self.stages.entry(stage) {
                slot.insert(StageRecord::skipped(stage, reason));
                skipped.push(stage);
            }
        }
        skipped
    }

    /// Stamps the end time and computes the overall status.
    pub fn finish(&mut self) {
        self.finished_at = Utc::now();
        self.duration_ms = (self.finished_at - self.started_at)
            .to_std()
            .map_or(0.0, |d| d.as_secs_f64() * 1000.0);
        self.status = overall_status(&self.stages);
    }

    /// Outcome recorded for `stage`.
    #[must_use]
    pub fn outcome(&self, stage: StageName) -> Option<StageOutcome> {
        self.stages.get(&stage).map(|r| r.outcome)
    }

    /// The state the run ended in.
    #[must_use]
    pub fn final_state(&self) -> PipelineState {
        self.transitions
            .last()
            .map_or(PipelineState::PendingGates, |t| t.to)
    }

    /// Process exit code.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.status.exit_code()
    }

    /// Renders the result as pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Renders a short human-readable report.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} run {} ({}): {}",
            self.pipeline, self.run_id, self.trigger, self.status
        );
        if let Some(reason) = &self.skip_reason {
            let _ = writeln!(out, "  skipped: {reason}");
        }
        for record in self.stages.values() {
            let detail = record
                .error
                .as_deref()
                .or(record.skip_reason.as_deref())
                .unwrap_or("");
            let stage = record.stage.as_str();
            let outcome = outcome_label(record.outcome);
            let _ = match record.duration_ms {
                Some(ms) => writeln!(out, "  {stage:<17} {outcome:<8} {ms:>9.1}ms {detail}"),
                None => writeln!(out, "  {stage:<17} {outcome:<8} {:>11} {detail}", ""),
            };
        }
        if let Some(digest) = &self.digest {
            let _ = writeln!(out, "  digest: {digest}");
        }
        if let Some(path) = &self.coverage_path {
            let _ = writeln!(out, "  coverage: {}", path.display());
        }
        if let Some(path) = &self.kept_staging {
            let _ = writeln!(out, "  staging kept at: {}", path.display());
        }
        out
    }
}

fn outcome_label(outcome: StageOutcome) -> &'static str {
    match outcome {
        StageOutcome::Success => "success",
        StageOutcome::Skipped => "skipped",
        StageOutcome::Failed => "failed",
    }
}

/// Derives the overall status from the stage records.
///
/// A failed fetch, verification or test run fails the run. Nothing fetched
/// means the run was skipped. A failed publish after passing tests is partial.
#[must_use]
pub fn overall_status(stages: &BTreeMap<StageName, StageRecord>) -> PipelineStatus {
    let outcome = |stage: StageName| stages.get(&stage).map(|r| r.outcome);

    let fatal = [
        StageName::FetchFixtures,
        StageName::VerifyIntegrity,
        StageName::RunTests,
    ];
    if fatal.into_iter().any(|s| outcome(s) == Some(StageOutcome::Failed)) {
        PipelineStatus::Failed
    } else if outcome(StageName::FetchFixtures) != Some(StageOutcome::Success) {
        PipelineStatus::Skipped
    } else if outcome(StageName::PublishReport) == Some(StageOutcome::Failed) {
        PipelineStatus::Partial
    } else {
        PipelineStatus::Success
    }
}
