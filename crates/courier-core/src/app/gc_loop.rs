//! GcLoop - 終了状態レコードの retention sweep

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::reclaimer::TaskReclaimer;
use crate::domain::CourierError;

pub struct GcLoop {
    reclaimer: Arc<TaskReclaimer>,
    interval: Duration,
    retention_days: u32,
}

impl GcLoop {
    pub fn new(reclaimer: Arc<TaskReclaimer>, interval: Duration, retention_days: u32) -> Self {
        Self {
            reclaimer,
            interval,
            retention_days,
        }
    }

    pub async fn tick(&self) -> Result<usize, CourierError> {
        self.reclaimer.cleanup_completed_tasks(self.retention_days).await
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "gc tick failed");
                    }
                }
            }
        }
        debug!("gc stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventEnvelope, MessageId, TaskId, TaskRecord};
    use crate::impls::{InMemoryEventSink, InMemoryTaskStore};
    use crate::ports::{FixedClock, TaskReader, TaskWriter};
    use crate::retry::RetryPolicyStore;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use ulid::Ulid;

    #[tokio::test]
    async fn tick_purges_only_expired_terminal_records() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(t0);
        let store = Arc::new(InMemoryTaskStore::new());
        let reclaimer = Arc::new(TaskReclaimer::new(
            store.clone(),
            Arc::new(RetryPolicyStore::new()),
            Arc::new(clock.clone()),
            Arc::new(InMemoryEventSink::new()),
        ));

        for id in ["done", "waiting"] {
            let envelope = EventEnvelope::new(MessageId::new(id).unwrap(), "t", t0, json!({}));
            let record = TaskRecord::create(TaskId::from_ulid(Ulid::new()), &envelope, 3, t0).unwrap();
            store.save(record).await.unwrap();
        }
        let done_id = MessageId::new("done").unwrap();
        let mut done = store.find_by_message_id(&done_id).await.unwrap().unwrap();
        let before = done.revision();
        done.mark_published(t0).unwrap();
        done.mark_processing(t0).unwrap();
        done.mark_completed(t0).unwrap();
        assert!(store.update_state(&done, before).await.unwrap());

        let gc = GcLoop::new(reclaimer, Duration::from_secs(60), 7);
        clock.advance(Duration::from_secs(6 * 86_400));
        assert_eq!(gc.tick().await.unwrap(), 0);

        clock.advance(Duration::from_secs(2 * 86_400));
        assert_eq!(gc.tick().await.unwrap(), 1);
        assert!(store.find_by_message_id(&done_id).await.unwrap().is_none());
        assert_eq!(store.len().await, 1);
    }
}
