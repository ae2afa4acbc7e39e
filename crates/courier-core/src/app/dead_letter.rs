//! DeadLetterRouter - FAILED タスクを dead-letter handler の連鎖に流す
//!
//! # 流れ
//! 1. topic を扱える handler を priority の小さい順に並べる
//! 2. 先頭から action を決めさせて実行し、成功した時点で止まる
//! 3. action が断られる / 失敗した場合は次の handler へ
//! 4. 誰も引き受けなければ error ログを残す（レコードは FAILED のまま）

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use tracing::{debug, error, info, warn};

use crate::domain::{
    AlertSeverity, CourierError, DeadLetterAction, DomainEvent, EventEnvelope, MessageId, RawEnvelope, TaskRecord,
};
use crate::ports::{Clock, DeadLetter, DeadLetterHandler, EventSink, IdGenerator, TaskStore};
use crate::retry::RetryPolicyStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterOutcome {
    Handled {
        handler: String,
        action: DeadLetterAction,
    },
    /// No handler supports the topic, or every action was declined.
    Unhandled,
}

/// Delay before a requeued successor becomes claimable; `None` once the task has retried too often.
pub fn requeue_delay(retry_count: u32) -> Option<Duration> {
    match retry_count {
        10.. => None,
        5..=9 => Some(Duration::from_secs(10)),
        3..=4 => Some(Duration::from_secs(5)),
        0..=2 => Some(Duration::from_secs(3)),
    }
}

pub struct DeadLetterRouter {
    handlers: Vec<Arc<dyn DeadLetterHandler>>,
    store: Arc<dyn TaskStore>,
    policies: Arc<RetryPolicyStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    events: Arc<dyn EventSink>,
}

impl DeadLetterRouter {
    pub fn new(
        store: Arc<dyn TaskStore>,
        policies: Arc<RetryPolicyStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            handlers: Vec::new(),
            store,
            policies,
            clock,
            ids,
            events,
        }
    }

    pub fn with_handler(mut self, handler: Arc<dyn DeadLetterHandler>) -> Self {
        self.register(handler);
        self
    }

    /// Equal priorities keep registration order.
    pub fn register(&mut self, handler: Arc<dyn DeadLetterHandler>) {
        self.handlers.push(handler);
        self.handlers.sort_by_key(|h| h.priority());
    }

    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Hand a FAILED record to the handler chain. Never fails the caller.
    pub async fn route(&self, record: &TaskRecord) -> DeadLetterOutcome {
        let letter = DeadLetter::new(record.clone(), self.clock.now());

        for handler in self.handlers.iter().filter(|h| h.supports(letter.topic())) {
            let action = handler.decide(&letter);
            match self.execute(&letter, action).await {
                Ok(true) => {
                    self.events.emit(&DomainEvent::TaskDeadLettered {
                        message_id: letter.message_id().clone(),
                        handler: handler.name().to_string(),
                        action,
                    });
                    info!(
                        message_id = %letter.message_id(),
                        topic = letter.topic(),
                        handler = handler.name(),
                        action = action.as_str(),
                        "dead letter handled"
                    );
                    return DeadLetterOutcome::Handled {
                        handler: handler.name().to_string(),
                        action,
                    };
                }
                Ok(false) => {
                    debug!(
                        message_id = %letter.message_id(),
                        handler = handler.name(),
                        action = action.as_str(),
                        "dead-letter action declined"
                    );
                }
                Err(err) => {
                    warn!(
                        message_id = %letter.message_id(),
                        handler = handler.name(),
                        action = action.as_str(),
                        error = %err,
                        "dead-letter action failed"
                    );
                }
            }
        }

        error!(
            message_id = %letter.message_id(),
            topic = letter.topic(),
            retry_count = letter.retry_count(),
            reason = letter.reason(),
            "no dead-letter handler took the task"
        );
        DeadLetterOutcome::Unhandled
    }

    async fn execute(&self, letter: &DeadLetter, action: DeadLetterAction) -> Result<bool, CourierError> {
        match action {
            DeadLetterAction::LogAndIgnore => {
                info!(message_id = %letter.message_id(), reason = letter.reason(), "dead letter ignored");
                Ok(true)
            }
            DeadLetterAction::StoreToDatabase => {
                self.store
                    .update_retry_info(
                        letter.message_id(),
                        letter.retry_count(),
                        Some(format!("dead letter: {}", letter.reason())),
                        self.clock.now(),
                    )
                    .await
            }
            DeadLetterAction::SendAlert => {
                self.events.emit(&DomainEvent::DeadLetterAlert {
                    message_id: letter.message_id().clone(),
                    topic: letter.topic().to_string(),
                    retry_count: letter.retry_count(),
                    reason: letter.reason().to_string(),
                    severity: AlertSeverity::from_retry_count(letter.retry_count()),
                });
                Ok(true)
            }
            DeadLetterAction::Requeue => self.requeue(letter).await,
        }
    }

    /// Enqueue `<message_id>.requeue-<retry_count>` with the original body and a fresh budget.
    async fn requeue(&self, letter: &DeadLetter) -> Result<bool, CourierError> {
        let Some(delay) = requeue_delay(letter.retry_count()) else {
            warn!(
                message_id = %letter.message_id(),
                retry_count = letter.retry_count(),
                "requeue refused; retried too often"
            );
            return Ok(false);
        };

        let original: RawEnvelope = letter.record.decode_envelope()?;
        let now = self.clock.now();
        let successor_id = MessageId::new(format!("{}.requeue-{}", letter.message_id(), letter.retry_count()))?;
        let envelope = EventEnvelope::new(successor_id.clone(), original.topic, now, original.data);
        let policy = self.policies.resolve(letter.topic());
        let not_before = TimeDelta::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(now);
        let successor =
            TaskRecord::create(self.ids.generate_task_id(), &envelope, policy.max_attempts(), now)?.defer_until(not_before);

        match self.store.save(successor).await {
            Ok(()) => {}
            // 同じ retry_count で既に再投入済み
            Err(CourierError::DuplicateMessage(_)) => return Ok(false),
            Err(err) => return Err(err),
        }
        self.events.emit(&DomainEvent::TaskCreated {
            message_id: successor_id.clone(),
            topic: envelope.topic,
        });
        info!(
            message_id = %letter.message_id(),
            successor = %successor_id,
            delay_ms = delay.as_millis() as u64,
            "dead letter requeued"
        );
        Ok(true)
    }
}
