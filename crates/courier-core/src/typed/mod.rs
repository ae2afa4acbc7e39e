//! Typed - 型付き Topic API
//!
//! topic 名の typo を型で排除し、Handler との対応付けを静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Topic` trait, `EventHandler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynEventHandler` trait - object-safe, type erasure

pub mod handler;
pub mod registry;
pub mod topic;

pub use self::handler::{DynEventHandler, EventHandler, TypedHandler};
pub use self::registry::HandlerRegistry;
pub use self::topic::Topic;
