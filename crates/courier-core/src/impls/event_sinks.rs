//! EventSink implementations.

use std::sync::{Mutex, PoisonError};

use tracing::{error, info, warn};

use crate::domain::{AlertSeverity, DomainEvent};
use crate::ports::EventSink;

/// Logs every event through `tracing`; failures are logged at a level matching their severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: &DomainEvent) {
        let message_id = event.message_id().as_str();
        match event {
            DomainEvent::TaskFailed {
                retry_count,
                error,
                severity,
                ..
            } => match severity {
                AlertSeverity::High | AlertSeverity::Critical => {
                    error!(event = event.name(), message_id, retry_count, ?severity, %error, "dead letter")
                }
                AlertSeverity::Low | AlertSeverity::Medium => {
                    warn!(event = event.name(), message_id, retry_count, ?severity, %error, "dead letter")
                }
            },
            DomainEvent::DeadLetterAlert {
                topic,
                retry_count,
                reason,
                severity,
                ..
            } => match severity {
                AlertSeverity::High | AlertSeverity::Critical => {
                    error!(event = event.name(), message_id, topic, retry_count, ?severity, %reason, "dead letter alert")
                }
                AlertSeverity::Low | AlertSeverity::Medium => {
                    warn!(event = event.name(), message_id, topic, retry_count, ?severity, %reason, "dead letter alert")
                }
            },
            _ => info!(event = event.name(), message_id, "domain event"),
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(DomainEvent::name)
            .collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, event: &DomainEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
