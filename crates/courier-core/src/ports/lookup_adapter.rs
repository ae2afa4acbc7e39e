//! LookupAdapter port - 交換可能な外部 lookup サービス
//!
//! Adapter は状態を持たない strategy object。優先度・有効/無効は AdapterRegistry が管理する。

use async_trait::async_trait;

use crate::lookup::AdapterError;

pub const DEFAULT_PRIORITY: i32 = 100;

#[async_trait]
pub trait LookupAdapter<Req, Resp>: Send + Sync {
    /// Unique name; the registry key.
    fn name(&self) -> &str;

    /// Live health check, consulted on every routing decision.
    fn is_available(&self) -> bool {
        true
    }

    /// Lower runs first. Used as the registered descriptor's initial priority.
    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    /// An unsuccessful reply is reported as `Err(AdapterError::Unsuccessful)`.
    async fn query(&self, request: &Req) -> Result<Resp, AdapterError>;
}
