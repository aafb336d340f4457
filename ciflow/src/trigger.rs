//! CI trigger classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The event that started the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// A push to a branch.
    Push,
    /// A pull request.
    PullRequest,
    /// An operator-started run (`workflow_dispatch`).
    Manual,
}

impl TriggerKind {
    /// Maps a `GITHUB_EVENT_NAME` value.
    #[must_use]
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name.trim() {
            "push" => Some(Self::Push),
            "pull_request" | "pull_request_target" => Some(Self::PullRequest),
            "workflow_dispatch" => Some(Self::Manual),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::PullRequest => write!(f, "pull_request"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A classified trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    /// What started the run.
    pub kind: TriggerKind,
    /// Target branch of a pull request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_branch: Option<String>,
}

impl Default for Trigger {
    fn default() -> Self {
        Self::manual()
    }
}

impl Trigger {
    /// A manual run.
    #[must_use]
    pub fn manual() -> Self {
        Self {
            kind: TriggerKind::Manual,
            target_branch: None,
        }
    }

    /// A push run.
    #[must_use]
    pub fn push() -> Self {
        Self {
            kind: TriggerKind::Push,
            target_branch: None,
        }
    }

    /// A pull request targeting `branch`.
    #[must_use]
    pub fn pull_request(branch: impl Into<String>) -> Self {
        Self {
            kind: TriggerKind::PullRequest,
            target_branch: Some(branch.into()),
        }
    }

    /// Classifies the run from GitHub Actions variables.
    ///
    /// Unknown or absent event names are treated as manual runs.
    pub fn from_github_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = lookup("GITHUB_EVENT_NAME")
            .as_deref()
            .and_then(TriggerKind::from_event_name)
            .unwrap_or(TriggerKind::Manual);
        let target_branch = match kind {
            TriggerKind::PullRequest => lookup("GITHUB_BASE_REF").filter(|b| !b.trim().is_empty()),
            _ => None,
        };
        Self { kind, target_branch }
    }

    /// Returns the reason this trigger should not run the pipeline, if any.
    ///
    /// Only pull requests are filtered: one targeting anything other than
    /// `primary_branch` is skipped.
    #[must_use]
    pub fn ineligibility(&self, primary_branch: &str) -> Option<String> {
        if self.kind != TriggerKind::PullRequest {
            return None;
        }
        match self.target_branch.as_deref() {
            Some(target) if target == primary_branch => None,
            Some(target) => Some(format!(
                "pull request targets {target}, not {primary_branch}"
            )),
            None => Some("pull request target branch unknown".to_string()),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target_branch {
            Some(branch) => write!(f, "{} -> {branch}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}
