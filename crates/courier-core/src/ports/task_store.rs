//! TaskStore port - outbox の永続化
//!
//! # 設計
//! - 読み取り（TaskReader）と書き込み（TaskWriter）を分離
//! - 書き込みは全て conditional write。呼び出し側が持つ Revision と一致した場合のみ反映する
//! - `limit` は各クエリの最大件数

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{CourierError, MessageId, Revision, TaskRecord, TaskState};
use crate::observability::TaskCounts;

#[async_trait]
pub trait TaskReader: Send + Sync {
    async fn find_by_message_id(&self, message_id: &MessageId)
    -> Result<Option<TaskRecord>, CourierError>;

    /// CREATE / PUBLISHED, oldest first.
    async fn find_pending_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>, CourierError>;

    /// FAILED / RETRY with `retry_count < max_retries`. Due tasks first, then by not-before time.
    async fn find_retryable_failed_tasks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, CourierError>;

    /// RETRY whose `next_attempt_at` has elapsed, earliest due first. The claimable set.
    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, CourierError>;

    /// PROCESSING with `now - updated_time > timeout`, longest-stuck first.
    async fn find_timeout_processing_tasks(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, CourierError>;

    async fn find_by_state(&self, state: TaskState, limit: usize)
    -> Result<Vec<TaskRecord>, CourierError>;

    async fn find_by_topic(&self, topic: &str, limit: usize) -> Result<Vec<TaskRecord>, CourierError>;

    async fn count_by_state(&self) -> Result<TaskCounts, CourierError>;
}

#[async_trait]
pub trait TaskWriter: Send + Sync {
    /// Insert a new record. Fails with `DuplicateMessage` if the message id exists.
    async fn save(&self, task: TaskRecord) -> Result<(), CourierError>;

    /// Replace the stored record with `task` if the stored revision equals `expected`.
    ///
    /// `Ok(false)` means someone else advanced the record first.
    async fn update_state(&self, task: &TaskRecord, expected: Revision) -> Result<bool, CourierError>;

    /// Overwrite retry bookkeeping; refused (`Ok(false)`) if it would lower `retry_count`.
    async fn update_retry_info(
        &self,
        message_id: &MessageId,
        retry_count: u32,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError>;

    /// Delete COMPLETED / FAILED records last updated before `before`. Returns the count removed.
    async fn cleanup_completed_tasks(&self, before: DateTime<Utc>) -> Result<usize, CourierError>;
}

pub trait TaskStore: TaskReader + TaskWriter {}

impl<T: TaskReader + TaskWriter + ?Sized> TaskStore for T {}
