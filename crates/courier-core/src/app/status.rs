//! Status - 運用向けの整合性スナップショット

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::observability::TaskCounts;

/// Produced by [`TaskReclaimer::status`](super::TaskReclaimer::status).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub generated_at: DateTime<Utc>,
    pub counts: TaskCounts,
    /// Still in CREATE.
    pub unpublished: usize,
    /// PROCESSING past the timeout.
    pub stuck_processing: usize,
    /// FAILED / RETRY with budget left.
    pub retryable: usize,
    /// RETRY whose not-before time has passed.
    pub due_retries: usize,
}

impl StatusReport {
    pub fn is_healthy(&self) -> bool {
        self.unpublished == 0 && self.stuck_processing == 0
    }
}
