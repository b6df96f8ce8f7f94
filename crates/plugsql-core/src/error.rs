use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlugsqlError {
    #[error("plugin not found: {path}: {source}")]
    PluginNotFound {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("plugin handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("plugin did not complete handshake within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("transaction already in progress")]
    TransactionAlreadyInProgress,
    #[error("transaction already closed")]
    TransactionAlreadyClosed,
    #[error("transaction aborted by plugin")]
    TransactionAborted,
    #[error("unsupported value type: {0}")]
    UnsupportedValueType(&'static str),
    #[error("malformed value: {0}")]
    MalformedValue(String),
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),
    #[error("channel closed")]
    ChannelClosed,
    #[error("connection closed")]
    ConnectionClosed,
    #[error("driver closed")]
    DriverClosed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("plugin error: {0}")]
    Remote(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("column count mismatch: expected {expected}, got {got}")]
    ColumnCount { expected: usize, got: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PlugsqlError {
    /// Errors after which the underlying channel can no longer be trusted.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            PlugsqlError::ChannelClosed
                | PlugsqlError::DeadlineExceeded(_)
                | PlugsqlError::Io(_)
                | PlugsqlError::Protocol(_)
        )
    }
}

pub type Result<T, E = PlugsqlError> = std::result::Result<T, E>;
