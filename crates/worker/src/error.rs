//! Worker error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("invalid worker option: {0}")]
    InvalidArgument(String),

    #[error("worker loop ended abnormally: {0}")]
    Join(String),
}
