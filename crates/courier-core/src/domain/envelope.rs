//! EventEnvelope - タスク payload の直列化形式
//!
//! `{id, topic, timestamp, data}`。`id` は TaskRecord の message_id と一致する。

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::errors::CourierError;
use super::ids::MessageId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub id: MessageId,
    pub topic: String,
    pub timestamp: DateTime<Utc>,
    pub data: T,
}

/// Envelope with an untyped JSON body.
pub type RawEnvelope = EventEnvelope<serde_json::Value>;

impl<T> EventEnvelope<T> {
    pub fn new(id: MessageId, topic: impl Into<String>, timestamp: DateTime<Utc>, data: T) -> Self {
        Self {
            id,
            topic: topic.into(),
            timestamp,
            data,
        }
    }
}

impl<T: Serialize> EventEnvelope<T> {
    pub fn encode(&self) -> Result<String, CourierError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<T: DeserializeOwned> EventEnvelope<T> {
    pub fn decode(raw: &str) -> Result<Self, CourierError> {
        Ok(serde_json::from_str(raw)?)
    }
}
