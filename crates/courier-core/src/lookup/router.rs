//! FailoverRouter - 優先度順の failover
//!
//! 呼び出しごとに registry から候補を取り直し、priority の低い順に
//! RetryingExecutor で試す。ある adapter が上限まで失敗したら次へ進む。
//! 利用不可の adapter は候補に入らないため、retry 回数も消費しない。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::error::{AdapterFailure, LookupError};
use super::executor::{AttemptPolicy, RetryError, RetryingExecutor};
use super::registry::{AdapterRegistry, Candidate};

/// A successful lookup and the adapter that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed<T> {
    pub adapter: String,
    pub attempts: u32,
    pub value: T,
}

pub struct FailoverRouter<Req, Resp> {
    registry: Arc<AdapterRegistry<Req, Resp>>,
    executor: RetryingExecutor,
}

impl<Req, Resp> FailoverRouter<Req, Resp> {
    pub fn new(registry: Arc<AdapterRegistry<Req, Resp>>, policy: AttemptPolicy) -> Self {
        Self {
            registry,
            executor: RetryingExecutor::new(policy),
        }
    }

    pub fn registry(&self) -> &Arc<AdapterRegistry<Req, Resp>> {
        &self.registry
    }

    pub fn policy(&self) -> &AttemptPolicy {
        self.executor.policy()
    }

    pub async fn query(&self, request: &Req) -> Result<Routed<Resp>, LookupError> {
        self.query_with_cancel(request, &CancellationToken::new()).await
    }

    pub async fn query_with_cancel(
        &self,
        request: &Req,
        cancel: &CancellationToken,
    ) -> Result<Routed<Resp>, LookupError> {
        let candidates = self.registry.candidates();
        if candidates.is_empty() {
            warn!("no lookup adapter available");
            return Err(LookupError::ServiceUnavailable);
        }

        let mut failures = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.run(&candidate, request, cancel).await {
                Ok(routed) => return Ok(routed),
                Err(Attempt::Failed(failure)) => {
                    warn!(
                        adapter = %failure.adapter,
                        attempts = failure.attempts,
                        error = %failure.error,
                        "lookup adapter exhausted, failing over"
                    );
                    failures.push(failure);
                }
                Err(Attempt::Cancelled) => return Err(LookupError::Cancelled),
            }
        }
        error!(adapters = failures.len(), "all lookup adapters exhausted");
        Err(LookupError::Exhausted(failures))
    }

    /// Query one named adapter with retries and no failover.
    pub async fn query_adapter(&self, name: &str, request: &Req) -> Result<Routed<Resp>, LookupError> {
        let candidate = self
            .registry
            .get(name)
            .ok_or_else(|| LookupError::UnknownAdapter(name.to_string()))?;
        if !self.registry.is_globally_enabled()
            || !candidate.descriptor.enabled
            || !candidate.adapter.is_available()
        {
            return Err(LookupError::ServiceUnavailable);
        }
        match self.run(&candidate, request, &CancellationToken::new()).await {
            Ok(routed) => Ok(routed),
            Err(Attempt::Failed(failure)) => Err(LookupError::Exhausted(vec![failure])),
            Err(Attempt::Cancelled) => Err(LookupError::Cancelled),
        }
    }

    /// Query the configured default port.
    pub async fn query_default(&self, request: &Req) -> Result<Routed<Resp>, LookupError> {
        let name = self
            .registry
            .default_adapter()
            .ok_or(LookupError::NoDefaultAdapter)?;
        self.query_adapter(&name, request).await
    }

    async fn run(
        &self,
        candidate: &Candidate<Req, Resp>,
        request: &Req,
        cancel: &CancellationToken,
    ) -> Result<Routed<Resp>, Attempt> {
        let name = &candidate.descriptor.name;
        match self.executor.call(&*candidate.adapter, request, cancel).await {
            Ok((value, attempts)) => {
                info!(adapter = %name, attempts, "lookup succeeded");
                Ok(Routed {
                    adapter: name.clone(),
                    attempts,
                    value,
                })
            }
            Err(RetryError::Exhausted {
                attempts,
                last_error,
            }) => Err(Attempt::Failed(AdapterFailure {
                adapter: name.clone(),
                attempts,
                error: last_error,
            })),
            Err(RetryError::Cancelled { attempts }) => {
                info!(adapter = %name, attempts, "lookup cancelled");
                Err(Attempt::Cancelled)
            }
        }
    }
}

enum Attempt {
    Failed(AdapterFailure),
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LookupConfig, PortConfig};
    use crate::lookup::fixtures::ScriptedAdapter;
    use std::time::Duration;
    use tokio::time::Instant;

    struct Fixture {
        router: FailoverRouter<String, String>,
        a: Arc<ScriptedAdapter>,
        b: Arc<ScriptedAdapter>,
        c: Arc<ScriptedAdapter>,
    }

    fn fixture(a: ScriptedAdapter, c: ScriptedAdapter) -> Fixture {
        let registry = Arc::new(AdapterRegistry::new());
        let a = Arc::new(a);
        let b = Arc::new(ScriptedAdapter::succeeding("B", 5).unavailable());
        let c = Arc::new(c);
        registry.register(a.clone()).unwrap();
        registry.register(b.clone()).unwrap();
        registry.register(c.clone()).unwrap();
        Fixture {
            router: FailoverRouter::new(registry, AttemptPolicy::default()),
            a,
            b,
            c,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fails_over_past_exhausted_adapter_and_skips_unavailable() {
        let f = fixture(
            ScriptedAdapter::failing("A", 10),
            ScriptedAdapter::succeeding("C", 20),
        );
        let started = Instant::now();
        let routed = f.router.query(&"LSVAM4187C2184847".to_string()).await.unwrap();

        assert_eq!(routed.adapter, "C");
        assert_eq!(routed.attempts, 1);
        assert_eq!(routed.value, "C:LSVAM4187C2184847");
        assert_eq!(f.a.calls(), 3);
        assert_eq!(f.b.calls(), 0);
        assert_eq!(f.c.calls(), 1);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_millis(2_100));
    }

    #[tokio::test(start_paused = true)]
    async fn all_adapters_failing_reports_each_failure() {
        let f = fixture(ScriptedAdapter::failing("A", 10), ScriptedAdapter::failing("C", 20));
        let err = f.router.query(&"vin".to_string()).await.unwrap_err();

        let failed: Vec<(&str, u32)> = err
            .failures()
            .iter()
            .map(|failure| (failure.adapter.as_str(), failure.attempts))
            .collect();
        assert_eq!(failed, vec![("A", 3), ("C", 3)]);
        assert_eq!(f.b.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn first_adapter_recovering_within_budget_wins() {
        let f = fixture(ScriptedAdapter::new("A", 10, 2), ScriptedAdapter::succeeding("C", 20));
        let routed = f.router.query(&"vin".to_string()).await.unwrap();
        assert_eq!((routed.adapter.as_str(), routed.attempts), ("A", 3));
        assert_eq!(f.c.calls(), 0);
    }

    #[tokio::test]
    async fn no_candidates_is_service_unavailable() {
        let registry: Arc<AdapterRegistry<String, String>> = Arc::new(AdapterRegistry::new());
        registry
            .register(Arc::new(ScriptedAdapter::succeeding("only", 1).unavailable()))
            .unwrap();
        let router = FailoverRouter::new(registry, AttemptPolicy::default());
        assert_eq!(
            router.query(&"vin".to_string()).await,
            Err(LookupError::ServiceUnavailable)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_failover() {
        let f = fixture(ScriptedAdapter::failing("A", 10), ScriptedAdapter::succeeding("C", 20));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            trigger.cancel();
        });

        let result = f.router.query_with_cancel(&"vin".to_string(), &cancel).await;
        assert_eq!(result, Err(LookupError::Cancelled));
        assert_eq!(f.a.calls(), 2);
        assert_eq!(f.c.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn query_adapter_targets_one_adapter() {
        let f = fixture(ScriptedAdapter::failing("A", 10), ScriptedAdapter::succeeding("C", 20));

        let err = f.router.query_adapter("A", &"vin".to_string()).await.unwrap_err();
        assert_eq!(err.failures().len(), 1);
        assert_eq!(f.c.calls(), 0);

        assert_eq!(
            f.router.query_adapter("B", &"vin".to_string()).await,
            Err(LookupError::ServiceUnavailable)
        );
        assert_eq!(
            f.router.query_adapter("Z", &"vin".to_string()).await,
            Err(LookupError::UnknownAdapter("Z".into()))
        );
    }

    #[tokio::test]
    async fn query_default_follows_reloaded_config() {
        let f = fixture(ScriptedAdapter::succeeding("A", 10), ScriptedAdapter::succeeding("C", 20));
        assert_eq!(
            f.router.query_default(&"vin".to_string()).await,
            Err(LookupError::NoDefaultAdapter)
        );

        let mut config = LookupConfig {
            default_port: Some("C".into()),
            ..LookupConfig::default()
        };
        config.ports.insert("C".into(), PortConfig::default());
        f.router.registry().reload(&config);

        let routed = f.router.query_default(&"vin".to_string()).await.unwrap();
        assert_eq!(routed.adapter, "C");
    }
}
