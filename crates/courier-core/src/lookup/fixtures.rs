use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::error::AdapterError;
use crate::ports::LookupAdapter;

/// Fails `failures` times, then answers `"{name}:{request}"`.
pub(crate) struct ScriptedAdapter {
    name: String,
    priority: i32,
    failures: u32,
    latency: Option<Duration>,
    available: AtomicBool,
    calls: AtomicU32,
}

impl ScriptedAdapter {
    pub(crate) fn succeeding(name: &str, priority: i32) -> Self {
        Self::new(name, priority, 0)
    }

    pub(crate) fn failing(name: &str, priority: i32) -> Self {
        Self::new(name, priority, u32::MAX)
    }

    pub(crate) fn new(name: &str, priority: i32, failures: u32) -> Self {
        Self {
            name: name.to_string(),
            priority,
            failures,
            latency: None,
            available: AtomicBool::new(true),
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub(crate) fn unavailable(self) -> Self {
        self.available.store(false, Ordering::SeqCst);
        self
    }

    pub(crate) fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LookupAdapter<String, String> for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn query(&self, request: &String) -> Result<String, AdapterError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if call < self.failures {
            return Err(AdapterError::call(format!("{} call {} failed", self.name, call + 1)));
        }
        Ok(format!("{}:{}", self.name, request))
    }
}
