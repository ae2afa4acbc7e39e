//! Lookup errors.
//!
//! - `AdapterError`: 1 回の adapter 呼び出しの失敗
//! - `LookupError`: router が呼び出し元に返す集約エラー

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// The adapter answered, but with a failure reply.
    #[error("unsuccessful reply: {0}")]
    Unsuccessful(String),

    #[error("call failed: {0}")]
    Call(String),

    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

impl AdapterError {
    pub fn unsuccessful(message: impl Into<String>) -> Self {
        Self::Unsuccessful(message.into())
    }

    pub fn call(message: impl Into<String>) -> Self {
        Self::Call(message.into())
    }
}

/// Last error of one adapter whose attempts were exhausted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterFailure {
    pub adapter: String,
    pub attempts: u32,
    pub error: AdapterError,
}

impl fmt::Display for AdapterFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} after {} attempt(s): {}", self.adapter, self.attempts, self.error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("no lookup adapter is available")]
    ServiceUnavailable,

    #[error("all lookup adapters failed: {}", join_failures(.0))]
    Exhausted(Vec<AdapterFailure>),

    #[error("lookup cancelled")]
    Cancelled,

    #[error("unknown lookup adapter: {0}")]
    UnknownAdapter(String),

    #[error("no default lookup adapter configured")]
    NoDefaultAdapter,
}

impl LookupError {
    pub fn failures(&self) -> &[AdapterFailure] {
        match self {
            Self::Exhausted(failures) => failures,
            _ => &[],
        }
    }
}

fn join_failures(failures: &[AdapterFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("lookup adapter already registered: {0}")]
    DuplicateAdapter(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_message_lists_every_adapter() {
        let err = LookupError::Exhausted(vec![
            AdapterFailure {
                adapter: "primary".into(),
                attempts: 3,
                error: AdapterError::call("connection reset"),
            },
            AdapterFailure {
                adapter: "backup".into(),
                attempts: 3,
                error: AdapterError::Timeout(Duration::from_secs(2)),
            },
        ]);
        let message = err.to_string();
        assert!(message.contains("primary after 3 attempt(s): call failed: connection reset"));
        assert!(message.contains("backup after 3 attempt(s): call timed out after 2s"));
        assert_eq!(err.failures().len(), 2);
    }

    #[test]
    fn non_exhausted_errors_carry_no_failures() {
        assert!(LookupError::Cancelled.failures().is_empty());
        assert!(LookupError::ServiceUnavailable.failures().is_empty());
    }
}
