//! Typed pipeline events.

use crate::core::{PipelineStatus, StageName};
use crate::trigger::Trigger;
use serde::Serialize;
use uuid::Uuid;

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The run began.
    PipelineStarted {
        /// Run identifier.
        run_id: Uuid,
        /// Pipeline name.
        pipeline: String,
        /// What started the run.
        trigger: Trigger,
    },
    /// A stage began.
    StageStarted {
        /// The stage.
        stage: StageName,
    },
    /// A stage finished successfully.
    StageCompleted {
        /// The stage.
        stage: StageName,
        /// Wall-clock time spent.
        duration_ms: f64,
    },
    /// A stage did not run.
    StageSkipped {
        /// The stage.
        stage: StageName,
        /// Why it did not run.
        reason: String,
    },
    /// A stage failed.
    StageFailed {
        /// The stage.
        stage: StageName,
        /// Error kind tag.
        kind: String,
        /// Error message.
        error: String,
    },
    /// The run reached a terminal state.
    PipelineCompleted {
        /// Run identifier.
        run_id: Uuid,
        /// Overall status.
        status: PipelineStatus,
        /// Wall-clock time of the whole run.
        duration_ms: f64,
    },
}

impl PipelineEvent {
    /// Dotted event type, e.g. `stage.started`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PipelineStarted { .. } => "pipeline.started",
            Self::StageStarted { .. } => "stage.started",
            Self::StageCompleted { .. } => "stage.completed",
            Self::StageSkipped { .. } => "stage.skipped",
            Self::StageFailed { .. } => "stage.failed",
            Self::PipelineCompleted { .. } => "pipeline.completed",
        }
    }

    /// The stage this event concerns, if any.
    #[must_use]
    pub fn stage(&self) -> Option<StageName> {
        match self {
            Self::StageStarted { stage }
            | Self::StageCompleted { stage, .. }
            | Self::StageSkipped { stage, .. }
            | Self::StageFailed { stage, .. } => Some(*stage),
            Self::PipelineStarted { .. } | Self::PipelineCompleted { .. } => None,
        }
    }

    /// Event payload as JSON.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
