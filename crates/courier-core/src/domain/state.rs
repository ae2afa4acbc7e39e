//! Task state machine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::CourierError;

/// Outbox task state.
///
/// State transitions:
/// - Create -> Published -> Processing -> Completed
/// - Processing -> Retry -> Processing (loop until the retry budget runs out)
/// - Processing -> Failed
///
/// Create is initial, Completed / Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Saved, not yet published for delivery.
    Create,

    /// Published, waiting for a worker.
    Published,

    /// Claimed by a worker; handler is running.
    Processing,

    /// Delivered successfully.
    Completed,

    /// Terminal failure (retry budget exhausted or permanent error).
    Failed,

    /// Waiting for the next attempt (`next_attempt_at`).
    Retry,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Create,
        TaskState::Published,
        TaskState::Processing,
        TaskState::Completed,
        TaskState::Failed,
        TaskState::Retry,
    ];

    pub fn code(self) -> &'static str {
        match self {
            TaskState::Create => "CREATE",
            TaskState::Published => "PUBLISHED",
            TaskState::Processing => "PROCESSING",
            TaskState::Completed => "COMPLETED",
            TaskState::Failed => "FAILED",
            TaskState::Retry => "RETRY",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Not yet picked up by any worker.
    pub fn is_pending(self) -> bool {
        matches!(self, TaskState::Create | TaskState::Published)
    }

    /// Eligible for the PROCESSING claim.
    pub fn is_claimable(self) -> bool {
        matches!(self, TaskState::Published | TaskState::Retry)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Create, Published)
                | (Published, Processing)
                | (Processing, Completed)
                | (Processing, Retry)
                | (Processing, Failed)
                | (Retry, Processing)
        )
    }

    pub fn ensure_transition(self, next: TaskState) -> Result<(), CourierError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(CourierError::InvalidTransition { from: self, to: next })
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for TaskState {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskState::ALL
            .into_iter()
            .find(|state| state.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CourierError::Validation(format!("unknown task state: {s}")))
    }
}
