//! EventSink port - ライフサイクルイベントの通知先

use crate::domain::DomainEvent;

/// Receives task lifecycle events. Emission never fails the caller.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DomainEvent);
}
