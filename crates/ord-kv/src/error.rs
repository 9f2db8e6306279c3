use std::io;

/// Errors from key-value backend operations.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// The key holds a value of a different kind than the operation expects.
    #[error("wrong kind of value at key {key}: expected {expected}")]
    WrongType { key: String, expected: &'static str },

    /// Keys must be non-empty.
    #[error("invalid key: {0:?}")]
    InvalidKey(String),

    /// A batch precondition failed at commit; nothing was applied.
    #[error("batch aborted at op {index} ({op}): precondition failed")]
    Aborted { index: usize, op: &'static str },

    /// A batch was committed with no queued writes.
    #[error("empty batch")]
    EmptyBatch,

    /// The backend has been closed.
    #[error("backend is closed")]
    Closed,

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal state could not be accessed (e.g. a poisoned lock).
    #[error("internal backend error: {0}")]
    Internal(String),
}

/// Result alias for backend operations.
pub type KvResult<T> = Result<T, KvError>;
