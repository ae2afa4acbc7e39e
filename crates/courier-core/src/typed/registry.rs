//! HandlerRegistry - topic -> handler の登録と管理
//!
//! 初期化時に構築（mutable）、実行時は Arc で共有して読み取り専用で使う。

use std::collections::HashMap;
use std::sync::Arc;

use super::handler::{DynEventHandler, EventHandler, TypedHandler};
use super::topic::Topic;
use crate::domain::CourierError;

/// # 使用例
/// ```ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register::<ModelSynced, _>(ModelSyncedHandler)?;
/// let handler = registry.get("catalog.model.synced");
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn DynEventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register<T: Topic, H: EventHandler<T> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<(), CourierError> {
        self.register_dyn(Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    /// Register an already type-erased handler under its own topic.
    pub fn register_dyn(&mut self, handler: Arc<dyn DynEventHandler>) -> Result<(), CourierError> {
        let topic = handler.topic().to_string();
        if self.handlers.contains_key(&topic) {
            return Err(CourierError::DuplicateHandler(topic));
        }
        self.handlers.insert(topic, handler);
        Ok(())
    }

    pub fn get(&self, topic: &str) -> Option<Arc<dyn DynEventHandler>> {
        self.handlers.get(topic).cloned()
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.handlers.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
