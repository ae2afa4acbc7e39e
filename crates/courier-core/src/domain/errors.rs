//! Errors - エラー型と分類

use thiserror::Error;

use super::ids::MessageId;
use super::state::TaskState;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（store の障害など。リトライ対象）
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition { from: TaskState, to: TaskState },

    #[error("task not found: message_id={0}")]
    TaskNotFound(MessageId),

    #[error("duplicate message: message_id={0}")]
    DuplicateMessage(MessageId),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("handler not found for topic={0}")]
    HandlerNotFound(String),

    #[error("duplicate handler for topic={0}")]
    DuplicateHandler(String),

    #[error("store error: {0}")]
    Store(String),
}

impl CourierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            // ハンドラ未登録はデプロイ順序の問題で一時的に起きうる
            CourierError::HandlerNotFound(_) => ErrorKind::Transient,
            CourierError::Store(_) => ErrorKind::Infrastructure,
            CourierError::InvalidTransition { .. }
            | CourierError::TaskNotFound(_)
            | CourierError::DuplicateMessage(_)
            | CourierError::Validation(_)
            | CourierError::Codec(_)
            | CourierError::DuplicateHandler(_) => ErrorKind::Permanent,
        }
    }
}

/// Failure reported by a downstream event handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?}: {message}")]
pub struct HandlerError {
    pub kind: ErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Infrastructure, message)
    }

    pub fn is_permanent(&self) -> bool {
        self.kind == ErrorKind::Permanent
    }
}

impl From<CourierError> for HandlerError {
    fn from(err: CourierError) -> Self {
        Self::new(err.kind(), err.to_string())
    }
}
