//! TaskRecord - outbox の永続化単位
//!
//! TaskRecord は配送状態の single source of truth です。
//! 状態遷移はすべてこの型のメソッドで行い、store には conditional write で反映します。

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::envelope::EventEnvelope;
use super::errors::CourierError;
use super::ids::{MessageId, TaskId};
use super::state::TaskState;
use crate::retry::RetryPolicy;

/// The `(state, version)` pair a conditional write is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub state: TaskState,
    pub version: u64,
}

/// Result of charging one failure against a task's retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Moved to RETRY; claimable again at `next_attempt_at`.
    Retry {
        delay: Duration,
        next_attempt_at: DateTime<Utc>,
    },
    /// Budget exhausted; moved to FAILED.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    task_id: TaskId,
    message_id: MessageId,
    topic: String,
    /// Encoded [`EventEnvelope`].
    payload: String,
    state: TaskState,
    retry_count: u32,
    max_retries: u32,
    error_message: Option<String>,
    last_retry_time: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
    created_time: DateTime<Utc>,
    updated_time: DateTime<Utc>,
    version: u64,
}

impl TaskRecord {
    /// Build a fresh CREATE record from an envelope.
    pub fn create<T: Serialize>(
        task_id: TaskId,
        envelope: &EventEnvelope<T>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<Self, CourierError> {
        if envelope.topic.trim().is_empty() {
            return Err(CourierError::Validation("topic must not be blank".to_string()));
        }
        if max_retries == 0 {
            return Err(CourierError::Validation("max_retries must be at least 1".to_string()));
        }
        Ok(Self {
            task_id,
            message_id: envelope.id.clone(),
            topic: envelope.topic.clone(),
            payload: envelope.encode()?,
            state: TaskState::Create,
            retry_count: 0,
            max_retries,
            error_message: None,
            last_retry_time: None,
            next_attempt_at: None,
            created_time: now,
            updated_time: now,
            version: 0,
        })
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn last_retry_time(&self) -> Option<DateTime<Utc>> {
        self.last_retry_time
    }

    pub fn next_attempt_at(&self) -> Option<DateTime<Utc>> {
        self.next_attempt_at
    }

    pub fn created_time(&self) -> DateTime<Utc> {
        self.created_time
    }

    pub fn updated_time(&self) -> DateTime<Utc> {
        self.updated_time
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn revision(&self) -> Revision {
        Revision {
            state: self.state,
            version: self.version,
        }
    }

    /// Same task: the fields that never change after `create` are equal.
    pub fn same_identity(&self, other: &TaskRecord) -> bool {
        self.task_id == other.task_id
            && self.message_id == other.message_id
            && self.topic == other.topic
            && self.payload == other.payload
            && self.created_time == other.created_time
    }

    /// Hold a fresh CREATE record back until `at`; claims before then are skipped as not due.
    pub fn defer_until(mut self, at: DateTime<Utc>) -> Self {
        if self.state == TaskState::Create {
            self.next_attempt_at = Some(at);
        }
        self
    }

    pub fn decode_envelope<T: DeserializeOwned>(&self) -> Result<EventEnvelope<T>, CourierError> {
        EventEnvelope::decode(&self.payload)
    }

    /// CREATE -> PUBLISHED.
    pub fn mark_published(&mut self, now: DateTime<Utc>) -> Result<(), CourierError> {
        self.transition(TaskState::Published, now)
    }

    /// PUBLISHED / RETRY -> PROCESSING.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> Result<(), CourierError> {
        self.transition(TaskState::Processing, now)?;
        self.next_attempt_at = None;
        Ok(())
    }

    /// PROCESSING -> COMPLETED.
    pub fn mark_completed(&mut self, now: DateTime<Utc>) -> Result<(), CourierError> {
        self.transition(TaskState::Completed, now)
    }

    /// PROCESSING -> FAILED without charging the retry budget.
    pub fn fail_permanently(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CourierError> {
        self.transition(TaskState::Failed, now)?;
        self.error_message = Some(error.into());
        self.next_attempt_at = None;
        Ok(())
    }

    /// Charge one failure: PROCESSING -> RETRY, or FAILED once the budget is spent.
    ///
    /// `max_retries` is refreshed from `policy` so a reloaded policy applies to
    /// tasks already in flight.
    pub fn record_failure(
        &mut self,
        policy: &RetryPolicy,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<FailureDisposition, CourierError> {
        if self.state != TaskState::Processing {
            return Err(CourierError::InvalidTransition {
                from: self.state,
                to: TaskState::Retry,
            });
        }

        let retry_count = self.retry_count.saturating_add(1);
        self.max_retries = policy.max_attempts();
        self.retry_count = retry_count;
        self.error_message = Some(error.into());
        self.last_retry_time = Some(now);

        if policy.can_retry(retry_count) {
            let delay = policy.delay_for(retry_count);
            let next_attempt_at = add_delay(now, delay);
            self.transition(TaskState::Retry, now)?;
            self.next_attempt_at = Some(next_attempt_at);
            Ok(FailureDisposition::Retry {
                delay,
                next_attempt_at,
            })
        } else {
            self.transition(TaskState::Failed, now)?;
            self.next_attempt_at = None;
            Ok(FailureDisposition::Failed)
        }
    }

    /// Overwrite retry bookkeeping. `retry_count` is never allowed to go down.
    pub fn apply_retry_info(
        &mut self,
        retry_count: u32,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if retry_count < self.retry_count {
            return false;
        }
        self.retry_count = retry_count;
        self.error_message = error;
        self.last_retry_time = Some(now);
        self.touch(now);
        self.version += 1;
        true
    }

    /// PROCESSING for strictly longer than `timeout`.
    pub fn is_timeout(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        self.state == TaskState::Processing
            && (now - self.updated_time)
                .to_std()
                .map(|elapsed| elapsed > timeout)
                .unwrap_or(false)
    }

    /// FAILED / RETRY with budget left.
    pub fn can_retry(&self) -> bool {
        matches!(self.state, TaskState::Failed | TaskState::Retry)
            && self.retry_count < self.max_retries
    }

    /// `next_attempt_at` has elapsed (or was never set).
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now)
    }

    /// How long the current claim has been held.
    pub fn processing_duration(&self, now: DateTime<Utc>) -> Option<Duration> {
        if self.state != TaskState::Processing {
            return None;
        }
        (now - self.updated_time).to_std().ok()
    }

    fn transition(&mut self, next: TaskState, now: DateTime<Utc>) -> Result<(), CourierError> {
        self.state.ensure_transition(next)?;
        self.state = next;
        self.touch(now);
        self.version += 1;
        Ok(())
    }

    // updated_time >= created_time を保つ（時計の巻き戻り対策）
    fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_time = now.max(self.created_time);
    }
}

fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
