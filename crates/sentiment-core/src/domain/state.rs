//! Job state machine.

use serde::{Deserialize, Serialize};

/// Job state.
///
/// State transitions:
/// - Inactive -> Active (worker accepts the request)
/// - Active -> Active (attempt failed, retry permitted)
/// - Active -> Completed
/// - Active -> Failed (retry denied, attempts exhausted, timeout, permanent failure)
///
/// Serialized as INACTIVE / ACTIVE / COMPLETED / FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Created by the orchestrator, no worker has picked it up yet.
    Inactive,

    /// Owned by the worker currently processing it.
    Active,

    /// The annotation succeeded; `result` is set.
    Completed,

    /// Gave up; `error` is set.
    Failed,
}

impl JobState {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Is `self -> next` one of the edges of the state machine?
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Inactive, JobState::Active)
                | (JobState::Active, JobState::Active)
                | (JobState::Active, JobState::Completed)
                | (JobState::Active, JobState::Failed)
        )
    }
}
