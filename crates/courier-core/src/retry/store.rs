//! RetryPolicyStore - topic ごとの RetryPolicy を解決する
//!
//! 解決順: 完全一致 -> `"default"` エントリ -> 組み込みポリシー

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use super::policy::RetryPolicy;
use crate::config::RetryConfig;
use crate::domain::CourierError;

pub const DEFAULT_POLICY_KEY: &str = "default";

/// Topic -> policy table. Reloadable at runtime; readers get an `Arc` snapshot.
#[derive(Debug, Default)]
pub struct RetryPolicyStore {
    policies: RwLock<HashMap<String, Arc<RetryPolicy>>>,
    builtin: Arc<RetryPolicy>,
}

impl RetryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &RetryConfig) -> Result<Self, CourierError> {
        let store = Self::new();
        store.reload(config)?;
        Ok(store)
    }

    pub fn with_policy(self, topic: impl Into<String>, policy: RetryPolicy) -> Self {
        self.insert(topic, policy);
        self
    }

    pub fn insert(&self, topic: impl Into<String>, policy: RetryPolicy) {
        self.write().insert(topic.into(), Arc::new(policy));
    }

    /// Replace the whole table. On a validation error the current table is kept.
    pub fn reload(&self, config: &RetryConfig) -> Result<(), CourierError> {
        let mut next = HashMap::with_capacity(config.strategies.len());
        for (topic, strategy) in &config.strategies {
            let policy = strategy
                .to_policy()
                .map_err(|e| CourierError::Validation(format!("retry strategy '{topic}': {e}")))?;
            next.insert(topic.clone(), Arc::new(policy));
        }
        *self.write() = next;
        Ok(())
    }

    pub fn resolve(&self, topic: &str) -> Arc<RetryPolicy> {
        let policies = self.policies.read().unwrap_or_else(PoisonError::into_inner);
        let topic = topic.trim();
        if !topic.is_empty()
            && let Some(policy) = policies.get(topic)
        {
            return Arc::clone(policy);
        }
        policies
            .get(DEFAULT_POLICY_KEY)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.builtin))
    }

    pub fn delay_for(&self, topic: &str, ordinal: u32) -> Duration {
        self.resolve(topic).delay_for(ordinal)
    }

    pub fn can_retry(&self, topic: &str, current_retry_count: u32) -> bool {
        self.resolve(topic).can_retry(current_retry_count)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .policies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        topics.sort();
        topics
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<RetryPolicy>>> {
        self.policies.write().unwrap_or_else(PoisonError::into_inner)
    }
}
