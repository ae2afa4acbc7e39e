//! Configuration loaded once at startup (JSON).
//!
//! Every section has defaults, so `{}` is a valid config.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryPolicy;
use crate::domain::CourierError;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub task_retry: RetryConfig,
    pub lookup: LookupConfig,
    pub worker: WorkerConfig,
    pub dead_letter: DeadLetterConfig,
}

impl CourierConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (topic, strategy) in &self.task_retry.strategies {
            strategy
                .to_policy()
                .map_err(|e| ConfigError::Invalid(format!("task_retry.strategies.{topic}: {e}")))?;
        }

        let lookup = &self.lookup;
        if lookup.max_attempts == 0 {
            return Err(ConfigError::Invalid("lookup.max_attempts must be at least 1".into()));
        }
        if let Some(default_port) = &lookup.default_port
            && !lookup.ports.contains_key(default_port)
        {
            return Err(ConfigError::Invalid(format!(
                "lookup.default_port '{default_port}' is not listed in lookup.ports"
            )));
        }

        let worker = &self.worker;
        if worker.workers == 0 {
            return Err(ConfigError::Invalid("worker.workers must be at least 1".into()));
        }
        if worker.batch_size == 0 {
            return Err(ConfigError::Invalid("worker.batch_size must be at least 1".into()));
        }
        if worker.poll_interval_ms == 0 || worker.reaper_interval_ms == 0 || worker.gc_interval_ms == 0 {
            return Err(ConfigError::Invalid("worker intervals must be non-zero".into()));
        }
        if self.dead_letter.alert_retry_count == 0 {
            return Err(ConfigError::Invalid("dead_letter.alert_retry_count must be at least 1".into()));
        }
        Ok(())
    }
}

/// `task_retry` section: topic -> strategy, plus an optional `"default"` entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategies: BTreeMap<String, RetryPolicyConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyConfig {
    pub max_attempts: u32,
    pub delays_ms: Vec<u64>,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
            delays_ms: vec![60_000, 300_000, 900_000],
            backoff_multiplier: RetryPolicy::DEFAULT_BACKOFF_MULTIPLIER,
            max_delay_ms: 1_800_000,
        }
    }
}

impl RetryPolicyConfig {
    pub fn to_policy(&self) -> Result<RetryPolicy, CourierError> {
        RetryPolicy::new(
            self.max_attempts,
            self.delays_ms.iter().copied().map(Duration::from_millis).collect(),
            self.backoff_multiplier,
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// `lookup` section: failover router settings and the adapter (port) table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Global switch; when off no adapter is a candidate.
    pub enabled: bool,
    pub default_port: Option<String>,
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
    pub call_timeout_ms: Option<u64>,
    pub ports: BTreeMap<String, PortConfig>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_port: None,
            max_attempts: 3,
            retry_interval_ms: 1_000,
            call_timeout_ms: None,
            ports: BTreeMap::new(),
        }
    }
}

impl LookupConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub enabled: bool,
    pub priority: i32,
    pub base_url: Option<String>,
    pub settings: BTreeMap<String, String>,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 100,
            base_url: None,
            settings: BTreeMap::new(),
        }
    }
}

/// `worker` section: worker pool and background loop cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub workers: usize,
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub processing_timeout_secs: u64,
    pub reaper_interval_ms: u64,
    pub retention_days: u32,
    pub gc_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            batch_size: 16,
            poll_interval_ms: 500,
            processing_timeout_secs: 60,
            reaper_interval_ms: 5_000,
            retention_days: 7,
            gc_interval_ms: 3_600_000,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }
}

/// `dead_letter` section: thresholds of the built-in handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// When off, FAILED tasks are only logged.
    pub enabled: bool,
    pub alert_retry_count: u32,
    pub alert_after_secs: u64,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            alert_retry_count: 5,
            alert_after_secs: 3_600,
        }
    }
}

impl DeadLetterConfig {
    pub fn alert_after(&self) -> Duration {
        Duration::from_secs(self.alert_after_secs)
    }
}
