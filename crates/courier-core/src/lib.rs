//! courier-core
//!
//! Reliable task dispatch (outbox) and lookup failover for the Courier runtime.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, state, task, envelope, errors, events）
//! - **retry**: topic ごとの RetryPolicy と RetryPolicyStore
//! - **ports**: 抽象化レイヤー（TaskReader / TaskWriter, Clock, IdGenerator, EventSink, DeadLetterHandler, LookupAdapter）
//! - **impls**: 実装（InMemoryTaskStore, event sinks, DefaultDeadLetterHandler）
//! - **typed**: 型付き Topic API（Topic trait, EventHandler trait, HandlerRegistry）
//! - **app**: アプリケーション層（builder, task_service, dispatch_worker, reclaimer, dead_letter, loops, status）
//! - **lookup**: 外部 lookup adapter の failover router（registry, executor, router, vin）
//! - **config**: JSON 設定
//! - **observability**: tracing 初期化と集計ビュー

pub mod config;
pub mod observability;

pub mod domain;
pub mod retry;
pub mod ports;
pub mod impls;
pub mod typed;
pub mod app;
pub mod lookup;

pub use self::app::{Courier, CourierBuilder, CourierHandle};
pub use self::config::CourierConfig;
pub use self::domain::{CourierError, ErrorKind, HandlerError};
