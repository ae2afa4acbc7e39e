//! App - アプリケーション層
//!
//! ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **CourierBuilder**: 構築とワイヤリング（fail-fast 検証）
//! - **TaskService**: outbox への投入と publish
//! - **TaskDispatchWorker**: claim -> handle -> settle
//! - **TaskReclaimer**: 回収系クエリ、timeout 回収、retention sweep
//! - **DeadLetterRouter**: FAILED タスクを priority 順の handler 連鎖で処理
//! - **WorkerGroup / ReaperLoop / GcLoop**: バックグラウンドループ
//! - **StatusReport**: 整合性スナップショット

pub mod builder;
pub mod dead_letter;
pub mod dispatch_worker;
pub mod gc_loop;
pub mod reaper_loop;
pub mod reclaimer;
pub mod status;
pub mod task_service;
pub mod worker_loop;

pub use self::builder::{BuildError, Courier, CourierBuilder, CourierHandle};
pub use self::dead_letter::{DeadLetterOutcome, DeadLetterRouter};
pub use self::dispatch_worker::{AttemptOutcome, SkipReason, TaskDispatchWorker};
pub use self::gc_loop::GcLoop;
pub use self::reaper_loop::{ReaperLoop, ReaperSettings};
pub use self::reclaimer::{ReclaimReport, TaskReclaimer};
pub use self::status::StatusReport;
pub use self::task_service::TaskService;
pub use self::worker_loop::{PollSettings, WorkerGroup};
