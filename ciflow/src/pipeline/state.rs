//! Controller states and their legal transitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Evaluating trigger eligibility and credential gates.
    PendingGates,
    /// Copying fixtures into the staging area.
    FetchingFixtures,
    /// Checking the aggregate digest.
    VerifyingIntegrity,
    /// Running the test suite.
    RunningTests,
    /// Uploading coverage, if allowed.
    Publishing,
    /// Terminal: success, skipped or partial.
    Done,
    /// Terminal: a fatal stage failed.
    Failed,
}

impl PipelineState {
    /// Returns true for `Done` and `Failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if the controller may move from `self` to `next`.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use PipelineState::{
            Done, Failed, FetchingFixtures, PendingGates, Publishing, RunningTests,
            VerifyingIntegrity,
        };
        matches!(
            (self, next),
            (PendingGates, FetchingFixtures | Done)
                | (FetchingFixtures, VerifyingIntegrity | Failed)
                | (VerifyingIntegrity, RunningTests | Failed)
                | (RunningTests, Publishing | Failed)
                | (Publishing, Done)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PendingGates => "pending_gates",
            Self::FetchingFixtures => "fetching_fixtures",
            Self::VerifyingIntegrity => "verifying_integrity",
            Self::RunningTests => "running_tests",
            Self::Publishing => "publishing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// State left.
    pub from: PipelineState,
    /// State entered.
    pub to: PipelineState,
}

#[cfg(test)]
mod tests {
    use super::PipelineState::*;

    #[test]
    fn test_forward_path() {
        let path = [
            PendingGates,
            FetchingFixtures,
            VerifyingIntegrity,
            RunningTests,
            Publishing,
            Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_no_skipping_verification() {
        assert!(!FetchingFixtures.can_transition_to(RunningTests));
        assert!(!VerifyingIntegrity.can_transition_to(Publishing));
        assert!(!PendingGates.can_transition_to(Publishing));
    }

    #[test]
    fn test_publish_never_fails_the_run() {
        assert!(!Publishing.can_transition_to(Failed));
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        for next in [PendingGates, FetchingFixtures, RunningTests, Done, Failed] {
            assert!(!Done.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
        assert!(Done.is_terminal());
        assert!(!Publishing.is_terminal());
    }
}
