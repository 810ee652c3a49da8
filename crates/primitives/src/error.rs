//! Primitive error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrimitiveError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("slot {index} out of range for aggregator of {capacity}")]
    SlotOutOfRange { index: usize, capacity: usize },

    #[error("invalid transition for process {process}: {from:?} -> {to:?}")]
    InvalidTransition {
        process: String,
        from: crate::process::ProcessStatus,
        to: crate::process::ProcessStatus,
    },

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl PrimitiveError {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub(crate) fn poisoned(what: &str, e: impl std::fmt::Display) -> Self {
        Self::LockPoisoned(format!("{what}: {e}"))
    }
}
