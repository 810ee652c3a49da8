//! Runtime error types.

use thiserror::Error;

use nimbus_core::{NimbusError, TaskFault};
use nimbus_primitives::PrimitiveError;
use nimbus_queue::QueueError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("primitive error: {0}")]
    Primitive(#[from] PrimitiveError),

    #[error("codec error: {0}")]
    Codec(#[from] NimbusError),

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("dependency not available: {0}")]
    MissingDependency(String),

    #[error("invalid runtime descriptor: {0}")]
    Descriptor(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("task faulted: {0}")]
    Faulted(#[from] TaskFault),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl RuntimeError {
    /// Short machine-readable label, used as the fault kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Queue(_) => "queue",
            Self::Primitive(_) => "primitive",
            Self::Codec(_) => "codec",
            Self::UnknownWorkflow(_) => "unknown_workflow",
            Self::MissingDependency(_) => "missing_dependency",
            Self::Descriptor(_) => "descriptor",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::LockPoisoned(_) => "lock_poisoned",
            Self::Faulted(_) => "faulted",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

impl From<RuntimeError> for TaskFault {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::Faulted(fault) => fault,
            other => TaskFault::failed(other.kind(), other.to_string()),
        }
    }
}
