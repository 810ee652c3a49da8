//! In-process queue with visibility-timeout leases.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use nimbus_core::config::QueueConfig;
use nimbus_core::{DependencyId, ProcessId};

use crate::blob::BlobStore;
use crate::error::QueueError;
use crate::queue::{PayloadRef, QueueHealth, QueueItem, QueueMessage, TaskQueue};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: Uuid,
    process_id: ProcessId,
    dependencies: Vec<DependencyId>,
    body: PayloadRef,
    enqueued_at: DateTime<Utc>,
    attempt_count: u32,
}

#[derive(Debug)]
struct Lease {
    message: StoredMessage,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<StoredMessage>,
    leased: HashMap<String, Lease>,
}

impl QueueState {
    /// Move every expired lease back to the ready queue.
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(lease) = self.leased.remove(&receipt) {
                debug!(message_id = %lease.message.id, "lease expired, message visible again");
                self.ready.push_back(lease.message);
            }
        }
    }
}

/// Queue backed by process memory.
///
/// Implements the full lease contract (ack, nack, redelivery on expiry) so
/// workers and clients sharing one instance behave as they would against a
/// remote queue.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    blobs: Arc<dyn BlobStore>,
    visibility_timeout: Duration,
    inline_limit: usize,
}

impl MemoryQueue {
    pub fn new(config: &QueueConfig, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            blobs,
            visibility_timeout: config.visibility_timeout,
            inline_limit: config.inline_payload_limit,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|e| QueueError::LockPoisoned(format!("memory queue: {e}")))
    }

    /// Park large bodies in blob storage; small ones stay inline.
    async fn store(&self, item: QueueItem) -> Result<StoredMessage, QueueError> {
        let id = Uuid::new_v4();
        let body = if item.body.len() > self.inline_limit {
            let key = format!("queue/{id}");
            self.blobs.put(&key, item.body).await?;
            PayloadRef::Blob(key)
        } else {
            PayloadRef::Inline(item.body)
        };

        Ok(StoredMessage {
            id,
            process_id: item.process_id,
            dependencies: item.dependencies,
            body,
            enqueued_at: Utc::now(),
            attempt_count: 0,
        })
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, item: QueueItem) -> Result<(), QueueError> {
        let stored = self.store(item).await?;
        debug!(message_id = %stored.id, process_id = %stored.process_id, "enqueued");
        self.state()?.ready.push_back(stored);
        Ok(())
    }

    async fn enqueue_batch(&self, items: Vec<QueueItem>) -> Result<(), QueueError> {
        let mut stored = Vec::with_capacity(items.len());
        for item in items {
            stored.push(self.store(item).await?);
        }
        debug!(count = stored.len(), "enqueued batch");
        self.state()?.ready.extend(stored);
        Ok(())
    }

    async fn try_dequeue(&self) -> Result<Option<QueueMessage>, QueueError> {
        let now = Instant::now();
        let mut state = self.state()?;
        state.reclaim_expired(now);

        let Some(mut message) = state.ready.pop_front() else {
            return Ok(None);
        };
        message.attempt_count += 1;

        let receipt_handle = Uuid::new_v4().to_string();
        state.leased.insert(
            receipt_handle.clone(),
            Lease {
                message: message.clone(),
                expires_at: now + self.visibility_timeout,
            },
        );

        Ok(Some(QueueMessage::new(
            message.id,
            receipt_handle,
            message.process_id,
            message.dependencies,
            message.enqueued_at,
            message.attempt_count,
            message.body,
            self.blobs.clone(),
        )))
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let lease = self
            .state()?
            .leased
            .remove(receipt_handle)
            .ok_or_else(|| QueueError::Ack(format!("unknown or expired receipt {receipt_handle}")))?;

        if let PayloadRef::Blob(key) = &lease.message.body {
            self.blobs.delete(key).await?;
        }
        debug!(message_id = %lease.message.id, "acked");
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.state()?;
        let lease = state
            .leased
            .remove(receipt_handle)
            .ok_or_else(|| QueueError::Ack(format!("unknown or expired receipt {receipt_handle}")))?;
        debug!(message_id = %lease.message.id, "nacked, message requeued");
        state.ready.push_back(lease.message);
        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        let state = self.state()?;
        Ok(QueueHealth {
            connected: true,
            approximate_message_count: Some(state.ready.len() as u64),
            in_flight: Some(state.leased.len() as u64),
            provider: "memory".to_string(),
        })
    }
}
