//! TaskService - outbox への投入口
//!
//! enqueue は CREATE で保存してから PUBLISHED に進める。publish に失敗しても
//! CREATE のまま残ったレコードは TaskReclaimer::recover_unpublished が拾う。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::domain::{CourierError, DomainEvent, EventEnvelope, MessageId, TaskRecord};
use crate::ports::{Clock, EventSink, IdGenerator, TaskStore};
use crate::retry::RetryPolicyStore;
use crate::typed::Topic;

pub struct TaskService {
    store: Arc<dyn TaskStore>,
    policies: Arc<RetryPolicyStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    events: Arc<dyn EventSink>,
    wake: Arc<Notify>,
}

impl TaskService {
    pub fn new(
        store: Arc<dyn TaskStore>,
        policies: Arc<RetryPolicyStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        events: Arc<dyn EventSink>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            store,
            policies,
            clock,
            ids,
            events,
            wake,
        }
    }

    /// Enqueue with a generated message id.
    pub async fn enqueue<T: Topic>(&self, data: T) -> Result<TaskRecord, CourierError> {
        let message_id = self.ids.generate_message_id();
        self.enqueue_with_id(message_id, data).await
    }

    /// Enqueue under a caller-chosen idempotency key.
    pub async fn enqueue_with_id<T: Topic>(
        &self,
        message_id: MessageId,
        data: T,
    ) -> Result<TaskRecord, CourierError> {
        let envelope = EventEnvelope::new(message_id, T::TOPIC, self.clock.now(), data);
        self.enqueue_envelope(&envelope).await
    }

    /// Enqueue an untyped body for `topic`.
    pub async fn enqueue_raw(
        &self,
        message_id: MessageId,
        topic: &str,
        data: serde_json::Value,
    ) -> Result<TaskRecord, CourierError> {
        let envelope = EventEnvelope::new(message_id, topic, self.clock.now(), data);
        self.enqueue_envelope(&envelope).await
    }

    async fn enqueue_envelope<T: Serialize + Sync>(
        &self,
        envelope: &EventEnvelope<T>,
    ) -> Result<TaskRecord, CourierError> {
        let max_retries = self.policies.resolve(&envelope.topic).max_attempts();
        let record = TaskRecord::create(
            self.ids.generate_task_id(),
            envelope,
            max_retries,
            envelope.timestamp,
        )?;
        self.store.save(record.clone()).await?;
        self.events.emit(&DomainEvent::TaskCreated {
            message_id: record.message_id().clone(),
            topic: record.topic().to_string(),
        });
        info!(
            message_id = %record.message_id(),
            topic = record.topic(),
            task_id = %record.task_id(),
            "task enqueued"
        );

        match self.publish(&record).await {
            Ok(Some(published)) => Ok(published),
            Ok(None) => Ok(record),
            Err(err) => {
                warn!(message_id = %record.message_id(), error = %err, "publish failed; left in CREATE");
                Ok(record)
            }
        }
    }

    /// CREATE -> PUBLISHED. `Ok(None)` if another writer moved the record first.
    pub async fn publish(&self, task: &TaskRecord) -> Result<Option<TaskRecord>, CourierError> {
        let mut published = task.clone();
        published.mark_published(self.clock.now())?;
        if !self.store.update_state(&published, task.revision()).await? {
            debug!(message_id = %task.message_id(), "publish lost to another writer");
            return Ok(None);
        }
        self.events.emit(&DomainEvent::TaskPublished {
            message_id: published.message_id().clone(),
        });
        self.wake.notify_waiters();
        Ok(Some(published))
    }

    pub async fn find(&self, message_id: &MessageId) -> Result<Option<TaskRecord>, CourierError> {
        self.store.find_by_message_id(message_id).await
    }
}
