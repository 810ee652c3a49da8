//! Durable task queue trait and types.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nimbus_core::{DependencyId, ProcessId};

use crate::blob::BlobStore;
use crate::error::QueueError;

/// One item handed to [`TaskQueue::enqueue`]: a serialized task plus the
/// routing metadata a worker needs before it can decode the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub process_id: ProcessId,
    pub dependencies: Vec<DependencyId>,
    /// Serialized task body.
    pub body: Vec<u8>,
}

/// Where a message body lives: small bodies travel inline, large ones are
/// parked in blob storage and fetched on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadRef {
    Inline(Vec<u8>),
    Blob(String),
}

/// A message leased from a queue.
///
/// The receipt handle must be passed to `ack` once the task has been run;
/// otherwise the message reappears when the lease expires.
pub struct QueueMessage {
    /// Unique message identifier, stable across redeliveries.
    pub id: Uuid,
    /// Lease-specific handle for ack/nack.
    pub receipt_handle: String,
    pub process_id: ProcessId,
    pub dependencies: Vec<DependencyId>,
    /// When the message was first enqueued.
    pub enqueued_at: DateTime<Utc>,
    /// Number of times this message has been handed out (1 on first delivery).
    pub attempt_count: u32,
    body: PayloadRef,
    blobs: Arc<dyn BlobStore>,
}

impl QueueMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        receipt_handle: String,
        process_id: ProcessId,
        dependencies: Vec<DependencyId>,
        enqueued_at: DateTime<Utc>,
        attempt_count: u32,
        body: PayloadRef,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            id,
            receipt_handle,
            process_id,
            dependencies,
            enqueued_at,
            attempt_count,
            body,
            blobs,
        }
    }

    /// Fetch the serialized task body, reading from blob storage if needed.
    pub async fn payload(&self) -> Result<Vec<u8>, QueueError> {
        match &self.body {
            PayloadRef::Inline(bytes) => Ok(bytes.clone()),
            PayloadRef::Blob(key) => self.blobs.get(key).await,
        }
    }

    pub fn is_blob_backed(&self) -> bool {
        matches!(self.body, PayloadRef::Blob(_))
    }
}

impl fmt::Debug for QueueMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMessage")
            .field("id", &self.id)
            .field("receipt_handle", &self.receipt_handle)
            .field("process_id", &self.process_id)
            .field("dependencies", &self.dependencies)
            .field("attempt_count", &self.attempt_count)
            .field("blob_backed", &self.is_blob_backed())
            .finish()
    }
}

/// Health status of a queue connection.
#[derive(Debug, Clone, Serialize)]
pub struct QueueHealth {
    /// Whether the queue is reachable.
    pub connected: bool,
    /// Approximate number of messages waiting to be leased.
    pub approximate_message_count: Option<u64>,
    /// Messages currently leased and not yet acknowledged.
    pub in_flight: Option<u64>,
    /// Queue provider name (e.g., "memory").
    pub provider: String,
}

impl fmt::Display for QueueHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "QueueHealth {{ connected: {}, messages: {:?}, in_flight: {:?}, provider: {} }}",
            self.connected, self.approximate_message_count, self.in_flight, self.provider
        )
    }
}

/// Trait for durable task queue backends.
///
/// Delivery is at-least-once: a leased message that is not acknowledged
/// within the provider's visibility timeout is handed out again.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, item: QueueItem) -> Result<(), QueueError>;

    /// Push several independent items in one write. No ordering is implied
    /// between them.
    async fn enqueue_batch(&self, items: Vec<QueueItem>) -> Result<(), QueueError>;

    /// Lease one message without waiting. Returns `None` if the queue is empty.
    async fn try_dequeue(&self) -> Result<Option<QueueMessage>, QueueError>;

    /// Acknowledge successful processing, removing the message from the queue.
    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Negative-acknowledge: the message becomes visible again at the back of the queue.
    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Check queue connectivity and return health status.
    async fn health_check(&self) -> Result<QueueHealth, QueueError>;
}
