//! Queue error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("acknowledge error: {0}")]
    Ack(String),

    #[error("blob not found: {0}")]
    BlobNotFound(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}
