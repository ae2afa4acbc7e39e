//! TaskReclaimer - 回収系のクエリと処理
//!
//! - pending / retryable / timeout のクエリ（worker と reaper が使う）
//! - PROCESSING のまま止まったタスクの回収（通常の失敗として retry budget を消費）
//! - save と publish の間で落ちた CREATE の救済
//! - 終了状態レコードの retention sweep

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use super::dead_letter::DeadLetterRouter;
use super::status::StatusReport;
use crate::domain::{CourierError, DomainEvent, FailureDisposition, TaskRecord, TaskState};
use crate::observability::TaskCounts;
use crate::ports::{Clock, EventSink, TaskStore};
use crate::retry::RetryPolicyStore;

/// Result of one timeout sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub retried: usize,
    pub failed: usize,
    /// Finished (or were reclaimed) by someone else before our write landed.
    pub lost: usize,
}

pub struct TaskReclaimer {
    store: Arc<dyn TaskStore>,
    policies: Arc<RetryPolicyStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
    dead_letters: Option<Arc<DeadLetterRouter>>,
}

impl TaskReclaimer {
    pub fn new(
        store: Arc<dyn TaskStore>,
        policies: Arc<RetryPolicyStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            store,
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

    pub async fn find_pending_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>, CourierError> {
        self.store.find_pending_tasks(limit).await
    }

    pub async fn find_retryable_failed_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>, CourierError> {
        self.store.find_retryable_failed_tasks(self.clock.now(), limit).await
    }

    /// RETRY tasks whose not-before time has elapsed; the ones a worker may claim now.
    pub async fn find_due_retries(&self, limit: usize) -> Result<Vec<TaskRecord>, CourierError> {
        self.store.find_due_retries(self.clock.now(), limit).await
    }

    pub async fn find_timeout_processing_tasks(
        &self,
        timeout: Duration,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, CourierError> {
        self.store
            .find_timeout_processing_tasks(self.clock.now(), timeout, limit)
            .await
    }

    pub async fn find_by_state(&self, state: TaskState, limit: usize) -> Result<Vec<TaskRecord>, CourierError> {
        self.store.find_by_state(state, limit).await
    }

    pub async fn find_by_topic(&self, topic: &str, limit: usize) -> Result<Vec<TaskRecord>, CourierError> {
        self.store.find_by_topic(topic, limit).await
    }

    pub async fn count_by_state(&self) -> Result<TaskCounts, CourierError> {
        self.store.count_by_state().await
    }

    /// Return PROCESSING tasks stuck longer than `timeout` to RETRY (or FAILED once
    /// their budget is spent).
    pub async fn reclaim_timed_out(
        &self,
        timeout: Duration,
        limit: usize,
    ) -> Result<ReclaimReport, CourierError> {
        let now = self.clock.now();
        let stuck = self.store.find_timeout_processing_tasks(now, timeout, limit).await?;
        let mut report = ReclaimReport::default();

        for task in stuck {
            let stuck_for = task.processing_duration(now).unwrap_or_default();
            let policy = self.policies.resolve(task.topic());
            let mut reclaimed = task.clone();
            let disposition = reclaimed.record_failure(
                &policy,
                format!("processing timeout after {}s", timeout.as_secs()),
                now,
            )?;

            if !self.store.update_state(&reclaimed, task.revision()).await? {
                debug!(message_id = %task.message_id(), "timed-out task settled concurrently");
                report.lost += 1;
                continue;
            }

            self.events.emit(&DomainEvent::TaskReclaimed {
                message_id: reclaimed.message_id().clone(),
                retry_count: reclaimed.retry_count(),
            });
            match disposition {
                FailureDisposition::Retry { next_attempt_at, .. } => {
                    report.retried += 1;
                    self.events.emit(&DomainEvent::TaskRetryScheduled {
                        message_id: reclaimed.message_id().clone(),
                        retry_count: reclaimed.retry_count(),
                        next_attempt_at,
                    });
                }
                FailureDisposition::Failed => {
                    report.failed += 1;
                    self.events.emit(&DomainEvent::failed(
                        reclaimed.message_id().clone(),
                        reclaimed.retry_count(),
                        reclaimed.error_message().unwrap_or_default(),
                    ));
                    if let Some(router) = &self.dead_letters {
                        router.route(&reclaimed).await;
                    }
                }
            }
            warn!(
                message_id = %reclaimed.message_id(),
                topic = reclaimed.topic(),
                retry_count = reclaimed.retry_count(),
                stuck_secs = stuck_for.as_secs(),
                state = %reclaimed.state(),
                "reclaimed timed-out task"
            );
        }
        Ok(report)
    }

    /// Advance CREATE records left behind between save and publish.
    pub async fn recover_unpublished(&self, limit: usize) -> Result<usize, CourierError> {
        let unpublished = self.store.find_by_state(TaskState::Create, limit).await?;
        let now = self.clock.now();
        let mut recovered = 0;
        for task in unpublished {
            let mut published = task.clone();
            published.mark_published(now)?;
            if self.store.update_state(&published, task.revision()).await? {
                self.events.emit(&DomainEvent::TaskPublished {
                    message_id: published.message_id().clone(),
                });
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!(recovered, "recovered unpublished tasks");
        }
        Ok(recovered)
    }

    /// Purge COMPLETED / FAILED records not updated for `before_days` days.
    pub async fn cleanup_completed_tasks(&self, before_days: u32) -> Result<usize, CourierError> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(TimeDelta::days(i64::from(before_days)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.store.cleanup_completed_tasks(cutoff).await?;
        if removed > 0 {
            info!(removed, before_days, "purged terminal tasks");
        }
        Ok(removed)
    }

    /// Consistency snapshot: counts plus the records that need attention.
    pub async fn status(&self, timeout: Duration) -> Result<StatusReport, CourierError> {
        let now = self.clock.now();
        let counts = self.store.count_by_state().await?;
        let stuck = self
            .store
            .find_timeout_processing_tasks(now, timeout, usize::MAX)
            .await?;
        let retryable = self.store.find_retryable_failed_tasks(now, usize::MAX).await?;
        let due_retries = self.store.find_due_retries(now, usize::MAX).await?.len();
        Ok(StatusReport {
            generated_at: now,
            unpublished: counts.create,
            stuck_processing: stuck.len(),
            retryable: retryable.len(),
            due_retries,
            counts,
        })
    }
}
