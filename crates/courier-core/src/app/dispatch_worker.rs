//! TaskDispatchWorker - claim -> handle -> settle
//!
//! # 流れ
//! 1. CREATE なら先に PUBLISHED へ（CAS）
//! 2. PUBLISHED / RETRY -> PROCESSING の claim（CAS）。負けたら Skipped(LostRace)
//! 3. topic の handler に配送
//! 4. 成功なら COMPLETED、失敗なら retry policy に従って RETRY / FAILED
//! 5. FAILED は dead-letter router へ
//!
//! 全ての遷移は store への conditional write で反映する。claim 中の handler 実行の間に
//! reclaimer がタスクを回収した場合、最後の書き込みは負けて Superseded になる。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::dead_letter::DeadLetterRouter;
use crate::domain::{
    CourierError, DomainEvent, FailureDisposition, HandlerError, MessageId, TaskRecord, TaskState,
};
use crate::ports::{Clock, EventSink, TaskStore};
use crate::retry::RetryPolicyStore;
use crate::typed::HandlerRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another worker advanced the record first.
    LostRace,
    /// The record is not in a claimable state.
    NotClaimable(TaskState),
    /// `next_attempt_at` is still in the future (RETRY, or a deferred requeue).
    NotDue,
    /// No record with that message id.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Skipped(SkipReason),
    Completed,
    RetryScheduled {
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
    },
    Failed {
        retry_count: u32,
        error: String,
    },
    /// The claim was taken back (timeout reclamation) while the handler ran.
    Superseded,
}

pub struct TaskDispatchWorker {
    store: Arc<dyn TaskStore>,
    registry: Arc<HandlerRegistry>,
    policies: Arc<RetryPolicyStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    dead_letters: Option<Arc<DeadLetterRouter>>,
}

impl TaskDispatchWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<HandlerRegistry>,
        policies: Arc<RetryPolicyStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
            registry,
            policies,
            clock,
            events,
            dead_letters: None,
        }
    }

    pub fn with_dead_letters(mut self, router: Arc<DeadLetterRouter>) -> Self {
        self.dead_letters = Some(router);
        self
    }

    pub async fn attempt_by_id(&self, message_id: &MessageId) -> Result<AttemptOutcome, CourierError> {
        match self.store.find_by_message_id(message_id).await? {
            Some(task) => self.attempt(task).await,
            None => Ok(AttemptOutcome::Skipped(SkipReason::Missing)),
        }
    }

    /// Run one delivery attempt for `task` (a snapshot read from the store).
    pub async fn attempt(&self, task: TaskRecord) -> Result<AttemptOutcome, CourierError> {
        let claimed = match self.claim(task).await? {
            Ok(claimed) => claimed,
            Err(reason) => return Ok(AttemptOutcome::Skipped(reason)),
        };

        let result = match self.registry.get(claimed.topic()) {
            Some(handler) => handler.handle_record(&claimed).await,
            None => Err(HandlerError::from(CourierError::HandlerNotFound(
                claimed.topic().to_string(),
            ))),
        };

        match result {
            Ok(()) => self.complete(claimed).await,
            Err(err) => self.settle_failure(claimed, err).await,
        }
    }

    async fn claim(&self, task: TaskRecord) -> Result<Result<TaskRecord, SkipReason>, CourierError> {
        let mut task = task;
        let now = self.clock.now();

        if task.state() == TaskState::Create {
            let mut published = task.clone();
            published.mark_published(now)?;
            if !self.store.update_state(&published, task.revision()).await? {
                debug!(message_id = %task.message_id(), "publish lost to another writer");
                return Ok(Err(SkipReason::LostRace));
            }
            self.events.emit(&DomainEvent::TaskPublished {
                message_id: published.message_id().clone(),
            });
            task = published;
        }

        if !task.state().is_claimable() {
            return Ok(Err(SkipReason::NotClaimable(task.state())));
        }
        if !task.is_due(now) {
            return Ok(Err(SkipReason::NotDue));
        }

        let mut claimed = task.clone();
        claimed.mark_processing(now)?;
        if !self.store.update_state(&claimed, task.revision()).await? {
            debug!(message_id = %task.message_id(), "claim lost to another worker");
            return Ok(Err(SkipReason::LostRace));
        }
        self.events.emit(&DomainEvent::TaskClaimed {
            message_id: claimed.message_id().clone(),
            retry_count: claimed.retry_count(),
        });
        debug!(
            message_id = %claimed.message_id(),
            topic = claimed.topic(),
            retry_count = claimed.retry_count(),
            "task claimed"
        );
        Ok(Ok(claimed))
    }

    async fn complete(&self, claimed: TaskRecord) -> Result<AttemptOutcome, CourierError> {
        let mut completed = claimed.clone();
        completed.mark_completed(self.clock.now())?;
        if !self.store.update_state(&completed, claimed.revision()).await? {
            warn!(message_id = %claimed.message_id(), "completion superseded by reclamation");
            return Ok(AttemptOutcome::Superseded);
        }
        self.events.emit(&DomainEvent::TaskCompleted {
            message_id: completed.message_id().clone(),
        });
        info!(
            message_id = %completed.message_id(),
            topic = completed.topic(),
            retry_count = completed.retry_count(),
            "task completed"
        );
        Ok(AttemptOutcome::Completed)
    }

    async fn settle_failure(
        &self,
        claimed: TaskRecord,
        err: HandlerError,
    ) -> Result<AttemptOutcome, CourierError> {
        let now = self.clock.now();
        let mut settled = claimed.clone();

        let disposition = if err.is_permanent() {
            settled.fail_permanently(err.message.clone(), now)?;
            FailureDisposition::Failed
        } else {
            let policy = self.policies.resolve(claimed.topic());
            settled.record_failure(&policy, err.message.clone(), now)?
        };

        if !self.store.update_state(&settled, claimed.revision()).await? {
            warn!(message_id = %claimed.message_id(), "failure report superseded by reclamation");
            return Ok(AttemptOutcome::Superseded);
        }

        match disposition {
            FailureDisposition::Retry {
                delay,
                next_attempt_at,
            } => {
                self.events.emit(&DomainEvent::TaskRetryScheduled {
                    message_id: settled.message_id().clone(),
                    retry_count: settled.retry_count(),
                    next_attempt_at,
                });
                warn!(
                    message_id = %settled.message_id(),
                    topic = settled.topic(),
                    retry_count = settled.retry_count(),
                    delay_ms = delay.as_millis() as u64,
                    error = %err.message,
                    "task failed; retry scheduled"
                );
                Ok(AttemptOutcome::RetryScheduled {
                    retry_count: settled.retry_count(),
                    next_attempt_at,
                })
            }
            FailureDisposition::Failed => {
                self.events.emit(&DomainEvent::failed(
                    settled.message_id().clone(),
                    settled.retry_count(),
                    err.message.clone(),
                ));
                error!(
                    message_id = %settled.message_id(),
                    topic = settled.topic(),
                    retry_count = settled.retry_count(),
                    kind = ?err.kind,
                    error = %err.message,
                    "task failed permanently"
                );
                if let Some(router) = &self.dead_letters {
                    router.route(&settled).await;
                }
                Ok(AttemptOutcome::Failed {
                    retry_count: settled.retry_count(),
                    error: err.message,
                })
            }
        }
    }
}
