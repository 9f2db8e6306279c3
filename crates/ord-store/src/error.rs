use ord_kv::KvError;
use ord_types::OrderId;

/// Errors from order store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The order could not be encoded.
    #[error("failed to encode order {id}: {reason}")]
    Serialization { id: OrderId, reason: String },

    /// Stored bytes could not be decoded into an order.
    #[error("corrupt record at {key}: {reason}")]
    CorruptRecord { key: String, reason: String },

    /// Insert on an id that is already present.
    #[error("order {0} already exists")]
    AlreadyExists(OrderId),

    /// Update or delete on an id that is not present.
    #[error("order {0} not found")]
    NotFound(OrderId),

    /// Connectivity or protocol failure from the backend.
    #[error("{op}: backend error: {source}")]
    Backend {
        op: &'static str,
        #[source]
        source: KvError,
    },

    /// An atomic batch could not be committed after it was queued.
    #[error("{op}: transaction failed: {source}")]
    Transaction {
        op: &'static str,
        #[source]
        source: KvError,
    },
}

impl StoreError {
    /// `true` for the "no such order" outcome, as opposed to a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
