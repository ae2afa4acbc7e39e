//! ReaperLoop - PROCESSING のまま止まったタスクの定期回収
//!
//! tick ごとに
//! 1. CREATE に取り残されたタスクを PUBLISHED へ
//! 2. timeout を超えた PROCESSING を RETRY / FAILED へ
//!
//! 回収できたらワーカーを起こす。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::reclaimer::{ReclaimReport, TaskReclaimer};
use crate::config::WorkerConfig;
use crate::domain::CourierError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperSettings {
    pub interval: Duration,
    pub processing_timeout: Duration,
    pub batch_size: usize,
}

impl From<&WorkerConfig> for ReaperSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            interval: config.reaper_interval(),
            processing_timeout: config.processing_timeout(),
            batch_size: config.batch_size,
        }
    }
}

pub struct ReaperLoop {
    reclaimer: Arc<TaskReclaimer>,
    wake: Arc<Notify>,
    settings: ReaperSettings,
}

impl ReaperLoop {
    pub fn new(reclaimer: Arc<TaskReclaimer>, wake: Arc<Notify>, settings: ReaperSettings) -> Self {
        Self {
            reclaimer,
            wake,
            settings,
        }
    }

    /// One sweep. Returns the number of recovered CREATE records and the timeout report.
    pub async fn tick(&self) -> Result<(usize, ReclaimReport), CourierError> {
        let recovered = self.reclaimer.recover_unpublished(self.settings.batch_size).await?;
        let report = self
            .reclaimer
            .reclaim_timed_out(self.settings.processing_timeout, self.settings.batch_size)
            .await?;
        if recovered > 0 || report.retried > 0 {
            self.wake.notify_waiters();
        }
        Ok((recovered, report))
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok((recovered, report)) => debug!(recovered, ?report, "reaper tick"),
                        Err(err) => warn!(error = %err, "reaper tick failed"),
                    }
                }
            }
        }
        debug!("reaper stopped");
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventEnvelope, MessageId, TaskId, TaskRecord, TaskState};
    use crate::impls::{InMemoryEventSink, InMemoryTaskStore};
    use crate::ports::{FixedClock, TaskReader, TaskWriter};
    use crate::retry::RetryPolicyStore;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use ulid::Ulid;

    #[tokio::test]
    async fn tick_recovers_and_reclaims() {
        let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(t0);
        let store = Arc::new(InMemoryTaskStore::new());
        let reclaimer = Arc::new(TaskReclaimer::new(
            store.clone(),
            Arc::new(RetryPolicyStore::new()),
            Arc::new(clock.clone()),
            Arc::new(InMemoryEventSink::new()),
        ));

        let mut records = Vec::new();
        for id in ["orphan", "stuck"] {
            let envelope = EventEnvelope::new(MessageId::new(id).unwrap(), "t", t0, json!({}));
            let record = TaskRecord::create(TaskId::from_ulid(Ulid::new()), &envelope, 3, t0).unwrap();
            store.save(record.clone()).await.unwrap();
            records.push(record);
        }
        let mut stuck = records[1].clone();
        let before = stuck.revision();
        stuck.mark_published(t0).unwrap();
        stuck.mark_processing(t0).unwrap();
        assert!(store.update_state(&stuck, before).await.unwrap());

        clock.advance(Duration::from_secs(120));
        let reaper = ReaperLoop::new(
            reclaimer,
            Arc::new(Notify::new()),
            ReaperSettings {
                interval: Duration::from_secs(1),
                processing_timeout: Duration::from_secs(60),
                batch_size: 10,
            },
        );
        let (recovered, report) = reaper.tick().await.unwrap();
        assert_eq!(recovered, 1);
        assert_eq!(report.retried, 1);

        let orphan = store.find_by_message_id(records[0].message_id()).await.unwrap().unwrap();
        assert_eq!(orphan.state(), TaskState::Published);
        let stuck = store.find_by_message_id(records[1].message_id()).await.unwrap().unwrap();
        assert_eq!(stuck.state(), TaskState::Retry);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let reclaimer = Arc::new(TaskReclaimer::new(
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(RetryPolicyStore::new()),
            Arc::new(crate::ports::SystemClock),
            Arc::new(InMemoryEventSink::new()),
        ));
        let cancel = CancellationToken::new();
        let handle = ReaperLoop::new(
            reclaimer,
            Arc::new(Notify::new()),
            ReaperSettings::from(&WorkerConfig::default()),
        )
        .spawn(cancel.clone());
        tokio::time::sleep(Duration::from_secs(30)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
