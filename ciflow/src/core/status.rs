//! Stage and pipeline status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed stages of a ciflow run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Copies remote fixtures into the staging area.
    FetchFixtures,
    /// Checks the aggregate digest of the staged fixtures.
    VerifyIntegrity,
    /// Runs the test suite with coverage.
    RunTests,
    /// Uploads the coverage report.
    PublishReport,
}

impl StageName {
    /// All stages in execution order.
    pub const ALL: [Self; 4] = [
        Self::FetchFixtures,
        Self::VerifyIntegrity,
        Self::RunTests,
        Self::PublishReport,
    ];

    /// Returns the stage name as used in logs and reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FetchFixtures => "fetch_fixtures",
            Self::VerifyIntegrity => "verify_integrity",
            Self::RunTests => "run_tests",
            Self::PublishReport => "publish_report",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Stage completed successfully.
    Success,
    /// Stage did not run.
    Skipped,
    /// Stage failed.
    Failed,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageOutcome {
    /// Returns true if the outcome indicates success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    /// Returns true if the outcome indicates failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// The overall status of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    /// Every executed stage succeeded.
    Success,
    /// The run was gated off before fetching anything.
    Skipped,
    /// Tests passed but the coverage report could not be published.
    Partial,
    /// A fatal stage failed.
    Failed,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Skipped => write!(f, "skipped"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl PipelineStatus {
    /// Process exit code reported to the invoking CI system.
    ///
    /// A partial run exits 0: publish failures never mask passing tests.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Success | Self::Skipped | Self::Partial => 0,
            Self::Failed => 1,
        }
    }

    /// Returns true if the run should be treated as green by CI.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.exit_code() == 0
    }
}
