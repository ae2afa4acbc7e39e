//! RetryingExecutor - adapter 単位の再試行
//!
//! `with_retry` は任意の非同期操作を固定回数・固定間隔で再試行する。
//! 待機は CancellationToken で中断でき、その場合は `RetryError::Cancelled` を返す。

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::AdapterError;
use crate::config::LookupConfig;
use crate::ports::LookupAdapter;

pub const MAX_RETRY_COUNT: u32 = 3;
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Per-call limit; `None` waits for the adapter indefinitely.
    pub call_timeout: Option<Duration>,
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRY_COUNT,
            interval: RETRY_INTERVAL,
            call_timeout: None,
        }
    }
}

impl AttemptPolicy {
    pub fn from_config(config: &LookupConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            interval: config.retry_interval(),
            call_timeout: config.call_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, last_error: E },
    /// `attempts` counts the calls that finished before cancellation.
    Cancelled { attempts: u32 },
}

/// Run `op` until it succeeds or `policy.max_attempts` is reached.
/// `op` receives the 1-based attempt number. Returns the value and the attempt that produced it.
pub async fn with_retry<T, E, F, Fut>(
    policy: &AttemptPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt - 1 });
        }
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt - 1 }),
            result = op(attempt) => result,
        };

        match result {
            Ok(value) => return Ok((value, attempt)),
            Err(last_error) if attempt >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt,
                    last_error,
                });
            }
            Err(_) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
                    _ = tokio::time::sleep(policy.interval) => {}
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryingExecutor {
    policy: AttemptPolicy,
}

impl RetryingExecutor {
    pub fn new(policy: AttemptPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &AttemptPolicy {
        &self.policy
    }

    pub async fn call<Req, Resp>(
        &self,
        adapter: &dyn LookupAdapter<Req, Resp>,
        request: &Req,
        cancel: &CancellationToken,
    ) -> Result<(Resp, u32), RetryError<AdapterError>> {
        let call_timeout = self.policy.call_timeout;
        let max_attempts = self.policy.max_attempts;
        with_retry(&self.policy, cancel, |attempt| async move {
            debug!(adapter = adapter.name(), attempt, "calling lookup adapter");
            let result = match call_timeout {
                Some(limit) => tokio::time::timeout(limit, adapter.query(request))
                    .await
                    .unwrap_or(Err(AdapterError::Timeout(limit))),
                None => adapter.query(request).await,
            };
            if let Err(err) = &result {
                warn!(
                    adapter = adapter.name(),
                    attempt,
                    max_attempts,
                    error = %err,
                    "lookup attempt failed"
                );
            }
            result
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::fixtures::ScriptedAdapter;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> AttemptPolicy {
        AttemptPolicy {
            max_attempts,
            ..AttemptPolicy::default()
        }
    }

    #[rstest]
    #[case(0, 1)]
    #[case(2, 3)]
    #[tokio::test(start_paused = true)]
    async fn with_retry_succeeds_after_failures(#[case] failures: u32, #[case] expected: u32) {
        let calls = AtomicU32::new(0);
        let result = with_retry(&policy(3), &CancellationToken::new(), |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { if n < failures { Err("boom") } else { Ok(n) } }
        })
        .await;
        assert_eq!(result, Ok((failures, expected)));
    }

    #[tokio::test(start_paused = true)]
    async fn with_retry_waits_interval_between_attempts() {
        let started = Instant::now();
        let result: Result<((), u32), _> =
            with_retry(&policy(3), &CancellationToken::new(), |_| async { Err("down") }).await;
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last_error: "down"
            })
        );
        // 3 回の試行の間に 2 回待つ
        let elapsed = started.elapsed();
        assert!(elapsed >= RETRY_INTERVAL * 2 && elapsed < RETRY_INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let result: Result<((), u32), _> =
            with_retry(&policy(3), &cancel, |_| async { Err("down") }).await;
        assert_eq!(result, Err(RetryError::Cancelled { attempts: 1 }));
        assert!(started.elapsed() < RETRY_INTERVAL);
    }

    #[tokio::test]
    async fn cancelled_before_start_makes_no_call() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicU32::new(0);
        let result: Result<((), u32), RetryError<&str>> = with_retry(&policy(3), &cancel, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;
        assert_eq!(result, Err(RetryError::Cancelled { attempts: 0 }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn executor_turns_slow_calls_into_timeouts() {
        let adapter = ScriptedAdapter::failing("slow", 10).with_latency(Duration::from_secs(5));
        let executor = RetryingExecutor::new(AttemptPolicy {
            max_attempts: 2,
            interval: Duration::from_millis(100),
            call_timeout: Some(Duration::from_secs(1)),
        });
        let result = executor
            .call(&adapter, &"VIN".to_string(), &CancellationToken::new())
            .await;
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 2,
                last_error: AdapterError::Timeout(Duration::from_secs(1)),
            })
        );
        assert_eq!(adapter.calls(), 2);
    }

    #[test]
    fn policy_from_config() {
        let config = LookupConfig {
            max_attempts: 0,
            retry_interval_ms: 250,
            call_timeout_ms: Some(2_000),
            ..LookupConfig::default()
        };
        let policy = AttemptPolicy::from_config(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert_eq!(policy.call_timeout, Some(Duration::from_secs(2)));
    }
}
