use crate::queue::QueueStatus;
use thiserror::Error;

/// Errors surfaced by the queue and property stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The requested queue transition is not in the closed transition set.
    #[error("illegal queue transition {from} -> {to}")]
    IllegalTransition { from: QueueStatus, to: QueueStatus },

    #[error("queue row {0} not found")]
    NotFound(i64),

    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    /// A persisted row no longer matches the domain model (bad status text,
    /// unparseable URL). Indicates schema drift or manual edits.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}
