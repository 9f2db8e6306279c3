use thiserror::Error;

use crate::id::OrderId;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid order id: {0}")]
    InvalidId(String),

    #[error("unknown status transition: {0}")]
    InvalidTransition(String),

    #[error("order {0} already shipped")]
    AlreadyShipped(OrderId),

    #[error("order {0} not shipped yet")]
    NotShipped(OrderId),

    #[error("order {0} already completed")]
    AlreadyCompleted(OrderId),
}
