//! Per-stage result record with factory methods.

use super::{StageName, StageOutcome};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The recorded result of one stage in a run.
///
/// Records are created through the factory methods and are not mutated
/// once stored in a [`PipelineResult`](crate::pipeline::PipelineResult).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageRecord {
    /// The stage this record belongs to.
    pub stage: StageName,

    /// The outcome of the stage.
    pub outcome: StageOutcome,

    /// Error message (for failed stages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Error type tag (for failed stages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// Skip reason (for skipped stages).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,

    /// Wall-clock duration, if the stage ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,

    /// Additional metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl StageRecord {
    fn with_outcome(stage: StageName, outcome: StageOutcome) -> Self {
        Self {
            stage,
            outcome,
            error: None,
            error_kind: None,
            skip_reason: None,
            duration_ms: None,
            metadata: HashMap::new(),
        }
    }

    /// Creates a successful record.
    #[must_use]
    pub fn success(stage: StageName) -> Self {
        Self::with_outcome(stage, StageOutcome::Success)
    }

    /// Creates a skipped record with a reason.
    #[must_use]
    pub fn skipped(stage: StageName, reason: impl Into<String>) -> Self {
        let mut record = Self::with_outcome(stage, StageOutcome::Skipped);
        record.skip_reason = Some(reason.into());
        record
    }

    /// Creates a failed record from an error.
    #[must_use]
    pub fn failed(stage: StageName, kind: impl Into<String>, error: impl Into<String>) -> Self {
        let mut record = Self::with_outcome(stage, StageOutcome::Failed);
        record.error_kind = Some(kind.into());
        record.error = Some(error.into());
        record
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Adds a single metadata entry.
    #[must_use]
    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    /// Returns true if the stage failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.outcome.is_failure()
    }

    /// Returns true if the stage was skipped.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.outcome == StageOutcome::Skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skipped_record() {
        let record = StageRecord::skipped(StageName::PublishReport, "publish credentials missing");
        assert!(record.is_skipped());
        assert!(!record.is_failure());
        assert_eq!(record.skip_reason.as_deref(), Some("publish credentials missing"));
        assert!(record.error.is_none());
    }

    #[test]
    fn test_failed_record() {
        let record = StageRecord::failed(StageName::VerifyIntegrity, "DigestMismatch", "boom")
            .with_duration_ms(12.5);
        assert!(record.is_failure());
        assert_eq!(record.error_kind.as_deref(), Some("DigestMismatch"));
        assert_eq!(record.duration_ms, Some(12.5));
    }

    #[test]
    fn test_record_serialization_omits_empty_fields() {
        let record = StageRecord::success(StageName::RunTests);
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["stage"], "run_tests");
        assert_eq!(json["outcome"], "success");
        assert!(json.get("error").is_none());
        assert!(json.get("metadata").is_none());
    }
}
