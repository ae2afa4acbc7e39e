//! In-memory TaskStore implementation.
//!
//! 単一の RwLock で保護された HashMap。読み取りは並行、書き込みは直列化される。
//! conditional write（Revision 比較 + 置換）は 1 回の write lock の中で完結する。

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::{CourierError, MessageId, Revision, TaskRecord, TaskState};
use crate::observability::TaskCounts;
use crate::ports::{TaskReader, TaskWriter};

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    records: RwLock<HashMap<MessageId, TaskRecord>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    async fn select<F>(&self, limit: usize, filter: F) -> Vec<TaskRecord>
    where
        F: Fn(&TaskRecord) -> bool,
    {
        let records = self.records.read().await;
        let mut matched: Vec<TaskRecord> = records.values().filter(|r| filter(r)).cloned().collect();
        drop(records);
        matched.sort_by_key(oldest_first);
        matched.truncate(limit);
        matched
    }
}

fn oldest_first(record: &TaskRecord) -> (DateTime<Utc>, ulid::Ulid) {
    (record.created_time(), record.task_id().as_ulid())
}

#[async_trait]
impl TaskReader for InMemoryTaskStore {
    async fn find_by_message_id(
        &self,
        message_id: &MessageId,
    ) -> Result<Option<TaskRecord>, CourierError> {
        Ok(self.records.read().await.get(message_id).cloned())
    }

    async fn find_pending_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>, CourierError> {
        Ok(self.select(limit, |r| r.state().is_pending()).await)
    }

    async fn find_retryable_failed_tasks(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, CourierError> {
        let records = self.records.read().await;
        let mut matched: Vec<TaskRecord> = records.values().filter(|r| r.can_retry()).cloned().collect();
        drop(records);
        // 期限到来済みを先に、その後は not-before 時刻順
        matched.sort_by_key(|r| {
            (
                !r.is_due(now),
                r.next_attempt_at().unwrap_or(r.updated_time()),
                oldest_first(r),
            )
        });
        matched.truncate(limit);
        Ok(matched)
    }

    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, CourierError> {
        let records = self.records.read().await;
        let mut matched: Vec<TaskRecord> = records
            .values()
            .filter(|r| r.state() == TaskState::Retry && r.is_due(now))
            .cloned()
            .collect();
        drop(records);
        matched.sort_by_key(|r| (r.next_attempt_at(), oldest_first(r)));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn find_timeout_processing_tasks(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, CourierError> {
        let records = self.records.read().await;
        let mut matched: Vec<TaskRecord> = records
            .values()
            .filter(|r| r.is_timeout(now, timeout))
            .cloned()
            .collect();
        drop(records);
        matched.sort_by_key(|r| (r.updated_time(), oldest_first(r)));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn find_by_state(
        &self,
        state: TaskState,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, CourierError> {
        Ok(self.select(limit, |r| r.state() == state).await)
    }

    async fn find_by_topic(&self, topic: &str, limit: usize) -> Result<Vec<TaskRecord>, CourierError> {
        Ok(self.select(limit, |r| r.topic() == topic).await)
    }

    async fn count_by_state(&self) -> Result<TaskCounts, CourierError> {
        Ok(self.records.read().await.values().map(TaskRecord::state).collect())
    }
}

#[async_trait]
impl TaskWriter for InMemoryTaskStore {
    async fn save(&self, task: TaskRecord) -> Result<(), CourierError> {
        let mut records = self.records.write().await;
        if records.contains_key(task.message_id()) {
            return Err(CourierError::DuplicateMessage(task.message_id().clone()));
        }
        records.insert(task.message_id().clone(), task);
        Ok(())
    }

    async fn update_state(&self, task: &TaskRecord, expected: Revision) -> Result<bool, CourierError> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(task.message_id())
            .ok_or_else(|| CourierError::TaskNotFound(task.message_id().clone()))?;
        if stored.revision() != expected {
            return Ok(false);
        }
        if !stored.same_identity(task) {
            return Err(CourierError::Validation(format!(
                "immutable fields of message_id={} cannot be rewritten",
                task.message_id()
            )));
        }
        *stored = task.clone();
        Ok(true)
    }

    async fn update_retry_info(
        &self,
        message_id: &MessageId,
        retry_count: u32,
        error_message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<bool, CourierError> {
        let mut records = self.records.write().await;
        let stored = records
            .get_mut(message_id)
            .ok_or_else(|| CourierError::TaskNotFound(message_id.clone()))?;
        Ok(stored.apply_retry_info(retry_count, error_message, now))
    }

    async fn cleanup_completed_tasks(&self, before: DateTime<Utc>) -> Result<usize, CourierError> {
        let mut records = self.records.write().await;
        let initial = records.len();
        records.retain(|_, r| !(r.state().is_terminal() && r.updated_time() < before));
        Ok(initial - records.len())
    }
}
