//! WorkerLoop - TaskDispatchWorker を回すワーカー群
//!
//! 各ワーカーは poll -> shuffle -> attempt を繰り返す。新規 publish は Notify で起こされ、
//! それ以外は poll_interval ごとに RETRY の期限到来を拾う。

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatch_worker::{AttemptOutcome, TaskDispatchWorker};
use super::reclaimer::TaskReclaimer;
use crate::config::WorkerConfig;
use crate::domain::{CourierError, TaskRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub batch_size: usize,
    pub poll_interval: Duration,
}

impl From<&WorkerConfig> for PollSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            poll_interval: config.poll_interval(),
        }
    }
}

/// Worker group handle.
/// - `request_shutdown()` でワーカー全体が新しいタスクを取らなくなる
/// - `join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers. Cancelling `cancel` (or this group) stops them.
    pub fn spawn(
        n: usize,
        worker: Arc<TaskDispatchWorker>,
        reclaimer: Arc<TaskReclaimer>,
        wake: Arc<Notify>,
        settings: PollSettings,
        cancel: &CancellationToken,
    ) -> Self {
        let cancel = cancel.child_token();
        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let join = tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&worker),
                Arc::clone(&reclaimer),
                Arc::clone(&wake),
                settings,
                cancel.clone(),
            ));
            joins.push(join);
        }
        info!(worker_count = n, batch_size = settings.batch_size, "worker group started");
        Self { cancel, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Stop taking new tasks. In-flight handler calls are not interrupted.
    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn join(self) {
        for join in self.joins {
            if let Err(err) = join.await {
                warn!(error = %err, "worker task panicked");
            }
        }
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        self.join().await;
    }
}

/// Pending tasks plus RETRY tasks that are due, up to `batch_size`.
pub async fn collect_batch(
    reclaimer: &TaskReclaimer,
    batch_size: usize,
) -> Result<Vec<TaskRecord>, CourierError> {
    let mut batch = reclaimer.find_pending_tasks(batch_size).await?;
    if batch.len() < batch_size {
        let room = batch_size - batch.len();
        batch.extend(reclaimer.find_due_retries(room).await?);
    }
    Ok(batch)
}

async fn worker_loop(
    worker_id: usize,
    worker: Arc<TaskDispatchWorker>,
    reclaimer: Arc<TaskReclaimer>,
    wake: Arc<Notify>,
    settings: PollSettings,
    cancel: CancellationToken,
) {
    debug!(worker_id, "worker started");
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let mut had_work = false;
        match collect_batch(&reclaimer, settings.batch_size).await {
            Ok(mut batch) => {
                // 複数ワーカーが同じ順序で claim し合わないよう並べ替える
                batch.shuffle(&mut rand::thread_rng());
                had_work = !batch.is_empty();
                for task in batch {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let message_id = task.message_id().clone();
                    match worker.attempt(task).await {
                        Ok(AttemptOutcome::Skipped(reason)) => {
                            debug!(worker_id, %message_id, ?reason, "attempt skipped");
                        }
                        Ok(outcome) => debug!(worker_id, %message_id, ?outcome, "attempt finished"),
                        Err(err) => {
                            warn!(worker_id, %message_id, error = %err, "attempt errored");
                            had_work = false;
                        }
                    }
                }
            }
            Err(err) => warn!(worker_id, error = %err, "failed to poll tasks"),
        }

        if had_work {
            continue;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = wake.notified() => {}
            _ = tokio::time::sleep(settings.poll_interval) => {}
        }
    }
    debug!(worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MessageId, TaskState};
    use crate::impls::{InMemoryEventSink, InMemoryTaskStore};
    use crate::ports::{SystemClock, UlidGenerator};
    use crate::retry::{RetryPolicy, RetryPolicyStore};
    use crate::typed::{HandlerRegistry, Topic};
    use crate::typed::handler::fixtures::{FlakyHandler, ModelSynced};
    use crate::app::TaskService;

    struct Fixture {
        service: TaskService,
        worker: Arc<TaskDispatchWorker>,
        reclaimer: Arc<TaskReclaimer>,
        wake: Arc<Notify>,
        handler: Arc<FlakyHandler>,
    }

    fn fixture(failures: u32) -> Fixture {
        let store = Arc::new(InMemoryTaskStore::new());
        let events = Arc::new(InMemoryEventSink::new());
        let clock = Arc::new(SystemClock);
        let wake = Arc::new(Notify::new());
        let policies = Arc::new(RetryPolicyStore::new().with_policy(
            ModelSynced::TOPIC,
            RetryPolicy::new(5, vec![Duration::from_millis(5)], 1.0, Duration::from_millis(5)).unwrap(),
        ));
        let handler = Arc::new(FlakyHandler::new(failures));
        let mut registry = HandlerRegistry::new();
        registry.register::<ModelSynced, _>(handler.clone()).unwrap();

        let service = TaskService::new(
            store.clone(),
            policies.clone(),
            clock.clone(),
            Arc::new(UlidGenerator::new(SystemClock)),
            events.clone(),
            wake.clone(),
        );
        let worker = Arc::new(TaskDispatchWorker::new(
            store.clone(),
            Arc::new(registry),
            policies.clone(),
            clock.clone(),
            events.clone(),
        ));
        let reclaimer = Arc::new(TaskReclaimer::new(store, policies, clock, events));
        Fixture {
            service,
            worker,
            reclaimer,
            wake,
            handler,
        }
    }

    async fn wait_for_terminal(service: &TaskService, id: &MessageId) -> TaskState {
        for _ in 0..500 {
            let state = service.find(id).await.unwrap().map(|t| t.state());
            if let Some(state) = state
                && state.is_terminal()
            {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {id} did not finish");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn workers_retry_until_success() {
        let f = fixture(2);
        let settings = PollSettings {
            batch_size: 4,
            poll_interval: Duration::from_millis(5),
        };
        let cancel = CancellationToken::new();
        let group = WorkerGroup::spawn(3, f.worker.clone(), f.reclaimer.clone(), f.wake.clone(), settings, &cancel);
        assert_eq!(group.len(), 3);

        let record = f
            .service
            .enqueue(ModelSynced {
                model_code: "M-77".into(),
            })
            .await
            .unwrap();
        let state = wait_for_terminal(&f.service, record.message_id()).await;
        group.shutdown_and_join().await;

        assert_eq!(state, TaskState::Completed);
        let stored = f.service.find(record.message_id()).await.unwrap().unwrap();
        assert_eq!(stored.retry_count(), 2);
        assert_eq!(f.handler.calls(), 3);
    }

    #[tokio::test]
    async fn parent_cancellation_stops_idle_workers() {
        let f = fixture(0);
        let settings = PollSettings {
            batch_size: 4,
            poll_interval: Duration::from_secs(3600),
        };
        let cancel = CancellationToken::new();
        let group = WorkerGroup::spawn(2, f.worker, f.reclaimer, f.wake, settings, &cancel);
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), group.join())
            .await
            .expect("workers should stop promptly");
    }

    #[tokio::test]
    async fn batch_includes_only_due_retries() {
        let f = fixture(10);
        let record = f
            .service
            .enqueue(ModelSynced {
                model_code: "M".into(),
            })
            .await
            .unwrap();
        assert!(matches!(
            f.worker.attempt(record).await.unwrap(),
            AttemptOutcome::RetryScheduled { .. }
        ));
        // 5ms の遅延中は候補に出ない
        let batch = collect_batch(&f.reclaimer, 10).await.unwrap();
        assert!(batch.is_empty() || batch.iter().all(|t| t.is_due(chrono::Utc::now())));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(collect_batch(&f.reclaimer, 10).await.unwrap().len(), 1);
    }
}
