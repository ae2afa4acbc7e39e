//! EventHandler trait - topic ごとの配送先
//!
//! `TypedHandler<T, H>` が payload のデコードを担当し、`DynEventHandler` として
//! HashMap に格納できるようにする（type erasure）。

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use super::topic::Topic;
use crate::domain::{EventEnvelope, HandlerError, TaskRecord};

/// Downstream consumer of one topic.
///
/// Delivery is at-least-once: the same envelope can arrive more than once.
#[async_trait]
pub trait EventHandler<T: Topic>: Send + Sync {
    async fn handle(&self, event: EventEnvelope<T>) -> Result<(), HandlerError>;
}

/// Object-safe handler working on the stored record.
#[async_trait]
pub trait DynEventHandler: Send + Sync {
    async fn handle_record(&self, record: &TaskRecord) -> Result<(), HandlerError>;
    fn topic(&self) -> &str;
}

#[async_trait]
impl<T: Topic, H: EventHandler<T> + ?Sized> EventHandler<T> for Arc<H> {
    async fn handle(&self, event: EventEnvelope<T>) -> Result<(), HandlerError> {
        (**self).handle(event).await
    }
}

pub struct TypedHandler<T: Topic, H: EventHandler<T>> {
    handler: H,
    _marker: PhantomData<T>,
}

impl<T: Topic, H: EventHandler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Topic, H: EventHandler<T>> DynEventHandler for TypedHandler<T, H> {
    async fn handle_record(&self, record: &TaskRecord) -> Result<(), HandlerError> {
        // デコードできない payload は何度リトライしても同じ結果になる
        let envelope: EventEnvelope<T> = record
            .decode_envelope()
            .map_err(|e| HandlerError::permanent(format!("payload decode: {e}")))?;
        if envelope.id != *record.message_id() {
            return Err(HandlerError::permanent(format!(
                "envelope id {} does not match message_id {}",
                envelope.id,
                record.message_id()
            )));
        }
        self.handler.handle(envelope).await
    }

    fn topic(&self) -> &str {
        T::TOPIC
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::domain::{ErrorKind, MessageId, TaskId};
    use chrono::Utc;
    use serde_json::json;
    use ulid::Ulid;

    fn record_for(envelope: &EventEnvelope<serde_json::Value>) -> TaskRecord {
        TaskRecord::create(TaskId::from_ulid(Ulid::new()), envelope, 3, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn decodes_and_dispatches() {
        let handler = TypedHandler::<ModelSynced, _>::new(FlakyHandler::new(0));
        let envelope = EventEnvelope::new(
            MessageId::new("m-1").unwrap(),
            ModelSynced::TOPIC,
            Utc::now(),
            json!({ "model_code": "X1" }),
        );
        handler.handle_record(&record_for(&envelope)).await.unwrap();
        assert_eq!(handler.topic(), "catalog.model.synced");
    }

    #[tokio::test]
    async fn undecodable_payload_is_permanent() {
        let handler = TypedHandler::<ModelSynced, _>::new(FlakyHandler::new(0));
        let envelope = EventEnvelope::new(
            MessageId::new("m-2").unwrap(),
            ModelSynced::TOPIC,
            Utc::now(),
            json!({ "unexpected": true }),
        );
        let err = handler.handle_record(&record_for(&envelope)).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Permanent);
    }

    #[tokio::test]
    async fn handler_errors_pass_through() {
        let handler = TypedHandler::<ModelSynced, _>::new(FlakyHandler::new(1));
        let envelope = EventEnvelope::new(
            MessageId::new("m-3").unwrap(),
            ModelSynced::TOPIC,
            Utc::now(),
            json!({ "model_code": "X1" }),
        );
        let record = record_for(&envelope);
        let err = handler.handle_record(&record).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Transient);
        assert!(handler.handle_record(&record).await.is_ok());
    }
}
