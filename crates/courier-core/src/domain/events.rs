//! Events - タスクのライフサイクルイベント
//!
//! EventSink へ送信される。TaskFailed には dead-letter 用の AlertSeverity が付く。

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ids::MessageId;

/// Alert level attached to a terminal failure, derived from how many retries were spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn from_retry_count(retry_count: u32) -> Self {
        match retry_count {
            5.. => AlertSeverity::Critical,
            3..=4 => AlertSeverity::High,
            1..=2 => AlertSeverity::Medium,
            0 => AlertSeverity::Low,
        }
    }
}

/// What to do with a terminally failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeadLetterAction {
    LogAndIgnore,
    /// Keep the FAILED row and stamp it as dead-lettered.
    StoreToDatabase,
    SendAlert,
    /// Enqueue a delayed successor carrying the same payload.
    Requeue,
}

impl DeadLetterAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeadLetterAction::LogAndIgnore => "LOG_AND_IGNORE",
            DeadLetterAction::StoreToDatabase => "STORE_TO_DATABASE",
            DeadLetterAction::SendAlert => "SEND_ALERT",
            DeadLetterAction::Requeue => "REQUEUE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    TaskCreated {
        message_id: MessageId,
        topic: String,
    },
    TaskPublished {
        message_id: MessageId,
    },
    TaskClaimed {
        message_id: MessageId,
        retry_count: u32,
    },
    TaskCompleted {
        message_id: MessageId,
    },
    TaskRetryScheduled {
        message_id: MessageId,
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
    },
    TaskFailed {
        message_id: MessageId,
        retry_count: u32,
        error: String,
        severity: AlertSeverity,
    },
    /// A timed-out PROCESSING claim was taken back by the reclaimer.
    TaskReclaimed {
        message_id: MessageId,
        retry_count: u32,
    },
    /// A FAILED task was taken care of by a dead-letter handler.
    TaskDeadLettered {
        message_id: MessageId,
        handler: String,
        action: DeadLetterAction,
    },
    DeadLetterAlert {
        message_id: MessageId,
        topic: String,
        retry_count: u32,
        reason: String,
        severity: AlertSeverity,
    },
}

impl DomainEvent {
    pub fn failed(message_id: MessageId, retry_count: u32, error: impl Into<String>) -> Self {
        DomainEvent::TaskFailed {
            message_id,
            retry_count,
            error: error.into(),
            severity: AlertSeverity::from_retry_count(retry_count),
        }
    }

    pub fn message_id(&self) -> &MessageId {
        match self {
            DomainEvent::TaskCreated { message_id, .. }
            | DomainEvent::TaskPublished { message_id }
            | DomainEvent::TaskClaimed { message_id, .. }
            | DomainEvent::TaskCompleted { message_id }
            | DomainEvent::TaskRetryScheduled { message_id, .. }
            | DomainEvent::TaskFailed { message_id, .. }
            | DomainEvent::TaskReclaimed { message_id, .. }
            | DomainEvent::TaskDeadLettered { message_id, .. }
            | DomainEvent::DeadLetterAlert { message_id, .. } => message_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::TaskCreated { .. } => "task_created",
            DomainEvent::TaskPublished { .. } => "task_published",
            DomainEvent::TaskClaimed { .. } => "task_claimed",
            DomainEvent::TaskCompleted { .. } => "task_completed",
            DomainEvent::TaskRetryScheduled { .. } => "task_retry_scheduled",
            DomainEvent::TaskFailed { .. } => "task_failed",
            DomainEvent::TaskReclaimed { .. } => "task_reclaimed",
            DomainEvent::TaskDeadLettered { .. } => "task_dead_lettered",
            DomainEvent::DeadLetterAlert { .. } => "dead_letter_alert",
        }
    }
}
