//! CourierBuilder - アプリケーションの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - 設定は build() 時に検証する
//! - expect_topics() で期待される topic を登録しておくと、
//!   build() 時に「期待集合 ⊆ 登録済み集合」をチェックする
//! - dead_letter.enabled なら DefaultDeadLetterHandler を末尾に持つ DeadLetterRouter を組み込む

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::dead_letter::DeadLetterRouter;
use super::dispatch_worker::TaskDispatchWorker;
use super::gc_loop::GcLoop;
use super::reaper_loop::{ReaperLoop, ReaperSettings};
use super::reclaimer::TaskReclaimer;
use super::task_service::TaskService;
use super::worker_loop::{PollSettings, WorkerGroup};
use crate::config::{ConfigError, CourierConfig};
use crate::domain::CourierError;
use crate::impls::{DefaultDeadLetterHandler, InMemoryTaskStore, TracingEventSink};
use crate::ports::{Clock, DeadLetterHandler, EventSink, IdGenerator, SystemClock, TaskStore, UlidGenerator};
use crate::retry::RetryPolicyStore;
use crate::typed::{EventHandler, HandlerRegistry, Topic};

/// # 使用例
/// ```ignore
/// let courier = CourierBuilder::new(config)
///     .register::<ModelSynced, _>(ModelSyncedHandler)?
///     .expect_topics(&[ModelSynced::TOPIC])
///     .build()?;
/// let handle = courier.start();
/// ```
pub struct CourierBuilder {
    config: CourierConfig,
    registry: HandlerRegistry,
    expected_topics: Option<Vec<String>>,
    store: Option<Arc<dyn TaskStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    events: Option<Arc<dyn EventSink>>,
    dead_letter_handlers: Vec<Arc<dyn DeadLetterHandler>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing topics: {0:?}. These topics were expected but not registered.")]
    MissingTopics(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Courier(#[from] CourierError),
}

impl CourierBuilder {
    pub fn new(config: CourierConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            expected_topics: None,
            store: None,
            clock: None,
            ids: None,
            events: None,
            dead_letter_handlers: Vec::new(),
        }
    }

    pub fn register<T: Topic, H: EventHandler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, CourierError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn expect_topics(mut self, topics: &[&str]) -> Self {
        self.expected_topics = Some(topics.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Defaults to [`InMemoryTaskStore`].
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to a [`UlidGenerator`] on the configured clock.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Defaults to [`TracingEventSink`].
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Runs ahead of the built-in handler unless its priority is `i32::MAX`.
    pub fn with_dead_letter_handler(mut self, handler: Arc<dyn DeadLetterHandler>) -> Self {
        self.dead_letter_handlers.push(handler);
        self
    }

    pub fn build(self) -> Result<Courier, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_topics {
            let registered = self.registry.topics();
            let missing: Vec<String> = expected
                .iter()
                .filter(|topic| !registered.contains(topic))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTopics(missing));
            }
        }
        if self.registry.is_empty() {
            warn!("no event handlers registered; every task will be retried until it fails");
        }

        let policies = Arc::new(RetryPolicyStore::from_config(&self.config.task_retry)?);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let events = self.events.unwrap_or_else(|| Arc::new(TracingEventSink));
        let registry = Arc::new(self.registry);
        let wake = Arc::new(Notify::new());

        let dead_letter = &self.config.dead_letter;
        let dead_letters = if dead_letter.enabled {
            let mut router = DeadLetterRouter::new(
                Arc::clone(&store),
                Arc::clone(&policies),
                Arc::clone(&clock),
                Arc::clone(&ids),
                Arc::clone(&events),
            );
            router.register(Arc::new(DefaultDeadLetterHandler::new(
                dead_letter.alert_retry_count,
                dead_letter.alert_after(),
            )));
            for handler in self.dead_letter_handlers {
                router.register(handler);
            }
            Some(Arc::new(router))
        } else {
            if !self.dead_letter_handlers.is_empty() {
                warn!("dead_letter.enabled is false; registered dead-letter handlers are ignored");
            }
            None
        };

        let service = Arc::new(TaskService::new(
            Arc::clone(&store),
            Arc::clone(&policies),
            Arc::clone(&clock),
            ids,
            Arc::clone(&events),
            Arc::clone(&wake),
        ));
        let mut worker = TaskDispatchWorker::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&policies),
            Arc::clone(&clock),
            Arc::clone(&events),
        );
        let mut reclaimer = TaskReclaimer::new(Arc::clone(&store), Arc::clone(&policies), clock, events);
        if let Some(router) = &dead_letters {
            worker = worker.with_dead_letters(Arc::clone(router));
            reclaimer = reclaimer.with_dead_letters(Arc::clone(router));
        }
        let worker = Arc::new(worker);
        let reclaimer = Arc::new(reclaimer);

        Ok(Courier {
            config: self.config,
            store,
            policies,
            registry,
            service,
            worker,
            reclaimer,
            dead_letters,
            wake,
        })
    }
}

/// Wired runtime. `start()` spawns workers, the reaper and the GC loop.
pub struct Courier {
    config: CourierConfig,
    store: Arc<dyn TaskStore>,
    policies: Arc<RetryPolicyStore>,
    registry: Arc<HandlerRegistry>,
    service: Arc<TaskService>,
    worker: Arc<TaskDispatchWorker>,
    reclaimer: Arc<TaskReclaimer>,
    dead_letters: Option<Arc<DeadLetterRouter>>,
    wake: Arc<Notify>,
}

impl Courier {
    pub fn builder(config: CourierConfig) -> CourierBuilder {
        CourierBuilder::new(config)
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn policies(&self) -> &Arc<RetryPolicyStore> {
        &self.policies
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn service(&self) -> &Arc<TaskService> {
        &self.service
    }

    pub fn worker(&self) -> &Arc<TaskDispatchWorker> {
        &self.worker
    }

    pub fn reclaimer(&self) -> &Arc<TaskReclaimer> {
        &self.reclaimer
    }

    pub fn dead_letters(&self) -> Option<&Arc<DeadLetterRouter>> {
        self.dead_letters.as_ref()
    }

    pub fn start(&self) -> CourierHandle {
        self.start_with(&CancellationToken::new())
    }

    /// Start under an externally owned token; cancelling it stops everything.
    pub fn start_with(&self, parent: &CancellationToken) -> CourierHandle {
        let cancel = parent.child_token();
        let worker_config = &self.config.worker;

        let workers = WorkerGroup::spawn(
            worker_config.workers,
            Arc::clone(&self.worker),
            Arc::clone(&self.reclaimer),
            Arc::clone(&self.wake),
            PollSettings::from(worker_config),
            &cancel,
        );
        let reaper = ReaperLoop::new(
            Arc::clone(&self.reclaimer),
            Arc::clone(&self.wake),
            ReaperSettings::from(worker_config),
        )
        .spawn(cancel.child_token());
        let gc = GcLoop::new(
            Arc::clone(&self.reclaimer),
            worker_config.gc_interval(),
            worker_config.retention_days,
        )
        .spawn(cancel.child_token());

        info!(
            workers = worker_config.workers,
            topics = ?self.registry.topics(),
            "courier started"
        );
        CourierHandle {
            cancel,
            workers,
            background: vec![reaper, gc],
        }
    }
}

pub struct CourierHandle {
    cancel: CancellationToken,
    workers: WorkerGroup,
    background: Vec<JoinHandle<()>>,
}

impl CourierHandle {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop all loops and wait for them. In-flight handler calls finish first.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.workers.join().await;
        for join in self.background {
            if let Err(err) = join.await {
                warn!(error = %err, "background loop panicked");
            }
        }
        info!("courier stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicyConfig;
    use crate::domain::{DeadLetterAction, DomainEvent, MessageId, TaskState};
    use crate::impls::InMemoryEventSink;
    use crate::ports::DeadLetter;
    use crate::typed::handler::fixtures::{FlakyHandler, ModelSynced, PartImported};
    use crate::app::AttemptOutcome;
    use std::time::Duration;

    struct Ignore;

    impl DeadLetterHandler for Ignore {
        fn name(&self) -> &str {
            "ignore-model-sync"
        }

        fn supports(&self, topic: &str) -> bool {
            topic == ModelSynced::TOPIC
        }

        fn decide(&self, _letter: &DeadLetter) -> DeadLetterAction {
            DeadLetterAction::LogAndIgnore
        }
    }

    #[test]
    fn build_success() {
        let courier = CourierBuilder::new(CourierConfig::default())
            .register::<ModelSynced, _>(FlakyHandler::new(0))
            .unwrap()
            .expect_topics(&[ModelSynced::TOPIC])
            .build();
        assert!(courier.is_ok());
    }

    #[test]
    fn build_missing_topics() {
        let courier = CourierBuilder::new(CourierConfig::default())
            .register::<ModelSynced, _>(FlakyHandler::new(0))
            .unwrap()
            .expect_topics(&[ModelSynced::TOPIC, PartImported::TOPIC])
            .build();
        assert!(matches!(
            courier,
            Err(BuildError::MissingTopics(missing)) if missing == vec![PartImported::TOPIC.to_string()]
        ));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let mut config = CourierConfig::default();
        config.worker.workers = 0;
        let courier = CourierBuilder::new(config).build();
        assert!(matches!(courier, Err(BuildError::Config(_))));
    }

    #[test]
    fn duplicate_registration_fails_at_register() {
        let result = CourierBuilder::new(CourierConfig::default())
            .register::<ModelSynced, _>(FlakyHandler::new(0))
            .unwrap()
            .register::<ModelSynced, _>(FlakyHandler::new(0));
        assert!(matches!(result, Err(CourierError::DuplicateHandler(_))));
    }

    #[tokio::test]
    async fn failed_tasks_reach_the_dead_letter_chain() {
        let events = Arc::new(InMemoryEventSink::new());
        let courier = CourierBuilder::new(CourierConfig::default())
            .register::<ModelSynced, _>(FlakyHandler::permanent())
            .unwrap()
            .with_event_sink(events.clone())
            .with_dead_letter_handler(Arc::new(Ignore))
            .build()
            .unwrap();
        let router = courier.dead_letters().unwrap();
        assert_eq!(router.handler_names(), vec!["ignore-model-sync", "default"]);

        let id = MessageId::new("model-sync-dead").unwrap();
        courier
            .service()
            .enqueue_with_id(id.clone(), ModelSynced {
                model_code: "Z-9".into(),
            })
            .await
            .unwrap();
        let outcome = courier.worker().attempt_by_id(&id).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Failed { retry_count: 0, .. }));

        assert!(events.events().iter().any(|e| matches!(
            e,
            DomainEvent::TaskDeadLettered { handler, action: DeadLetterAction::LogAndIgnore, .. }
                if handler == "ignore-model-sync"
        )));
    }

    #[test]
    fn disabled_dead_letters_build_no_router() {
        let mut config = CourierConfig::default();
        config.dead_letter.enabled = false;
        let courier = CourierBuilder::new(config)
            .with_dead_letter_handler(Arc::new(Ignore))
            .build()
            .unwrap();
        assert!(courier.dead_letters().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn started_courier_delivers_with_retries() {
        let mut config = CourierConfig::default();
        config.worker.poll_interval_ms = 5;
        config.task_retry.strategies.insert(
            ModelSynced::TOPIC.to_string(),
            RetryPolicyConfig {
                max_attempts: 3,
                delays_ms: vec![5],
                backoff_multiplier: 1.0,
                max_delay_ms: 5,
            },
        );
        let handler = Arc::new(FlakyHandler::new(1));
        let courier = CourierBuilder::new(config)
            .register::<ModelSynced, _>(handler.clone())
            .unwrap()
            .build()
            .unwrap();
        let handle = courier.start();

        let id = MessageId::new("model-sync-1").unwrap();
        courier
            .service()
            .enqueue_with_id(id.clone(), ModelSynced {
                model_code: "A-1".into(),
            })
            .await
            .unwrap();

        let mut state = TaskState::Published;
        for _ in 0..400 {
            state = courier.service().find(&id).await.unwrap().unwrap().state();
            if state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await;

        assert_eq!(state, TaskState::Completed);
        assert_eq!(handler.calls(), 2);
        let counts = courier.reclaimer().count_by_state().await.unwrap();
        assert_eq!(counts.completed, 1);
    }
}
