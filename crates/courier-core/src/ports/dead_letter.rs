//! DeadLetterHandler port - FAILED になったタスクの後始末
//!
//! handler は action を選ぶだけで、実行は [`crate::app::DeadLetterRouter`] が行う。
//! `supports(topic)` で対象を絞り、`priority()` の小さい順に試される。

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{DeadLetterAction, MessageId, TaskRecord};

/// Snapshot of a FAILED task handed to dead-letter handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub record: TaskRecord,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(record: TaskRecord, failed_at: DateTime<Utc>) -> Self {
        Self { record, failed_at }
    }

    pub fn message_id(&self) -> &MessageId {
        self.record.message_id()
    }

    pub fn topic(&self) -> &str {
        self.record.topic()
    }

    pub fn retry_count(&self) -> u32 {
        self.record.retry_count()
    }

    pub fn reason(&self) -> &str {
        self.record.error_message().unwrap_or("unknown")
    }

    /// Time from enqueue to the terminal failure.
    pub fn failure_duration(&self) -> Duration {
        (self.failed_at - self.record.created_time())
            .to_std()
            .unwrap_or_default()
    }
}

pub trait DeadLetterHandler: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, _topic: &str) -> bool {
        true
    }

    /// Lower runs first.
    fn priority(&self) -> i32 {
        100
    }

    fn decide(&self, letter: &DeadLetter) -> DeadLetterAction;
}
