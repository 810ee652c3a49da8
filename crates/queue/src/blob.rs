//! Key-value blob storage used for large task payloads and dependency images.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::QueueError;

/// Trait for blob storage backends.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous value.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), QueueError>;

    /// Fetch the blob stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, QueueError>;

    async fn exists(&self, key: &str) -> Result<bool, QueueError>;

    /// Remove a blob. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), QueueError>;
}

/// Process-local blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<E: std::fmt::Display>(e: E) -> QueueError {
    QueueError::LockPoisoned(format!("blob store: {e}"))
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), QueueError> {
        self.blobs.write().map_err(poisoned)?.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, QueueError> {
        self.blobs
            .read()
            .map_err(poisoned)?
            .get(key)
            .cloned()
            .ok_or_else(|| QueueError::BlobNotFound(key.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, QueueError> {
        Ok(self.blobs.read().map_err(poisoned)?.contains_key(key))
    }

    async fn delete(&self, key: &str) -> Result<(), QueueError> {
        self.blobs.write().map_err(poisoned)?.remove(key);
        Ok(())
    }
}
