//! Impls - 開発・テスト用の実装

pub mod dead_letter;
pub mod event_sinks;
pub mod inmem_store;

pub use self::dead_letter::DefaultDeadLetterHandler;
pub use self::event_sinks::{InMemoryEventSink, TracingEventSink};
pub use self::inmem_store::InMemoryTaskStore;
