//! Ports - 抽象化レイヤー
//!
//! 各 trait は外部システム（永続化、時刻、ID 採番、イベント通知、dead letter、外部 lookup サービス）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod dead_letter;
pub mod event_sink;
pub mod id_generator;
pub mod lookup_adapter;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::dead_letter::{DeadLetter, DeadLetterHandler};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lookup_adapter::LookupAdapter;
pub use self::task_store::{TaskReader, TaskStore, TaskWriter};
