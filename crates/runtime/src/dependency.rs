//! Shipping binary dependencies to workers.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::debug;

use nimbus_core::DependencyId;
use nimbus_queue::BlobStore;

use crate::error::RuntimeError;

/// Makes named dependencies available to the local process.
#[async_trait]
pub trait DependencyExporter: Send + Sync {
    /// Upload a dependency image so workers can load it.
    async fn publish(&self, id: &DependencyId, image: Vec<u8>) -> Result<(), RuntimeError>;

    /// Ensure every dependency in `ids` is loaded locally. Idempotent.
    async fn load_dependencies(&self, ids: &[DependencyId]) -> Result<(), RuntimeError>;

    async fn is_loaded(&self, id: &DependencyId) -> Result<bool, RuntimeError>;
}

/// Dependency exporter that keeps images in a [`BlobStore`] under
/// `deps/{name}/{version}`.
pub struct BlobDependencyExporter {
    blobs: Arc<dyn BlobStore>,
    loaded: RwLock<HashSet<DependencyId>>,
}

impl BlobDependencyExporter {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            loaded: RwLock::new(HashSet::new()),
        }
    }

    fn key(id: &DependencyId) -> String {
        format!("deps/{}/{}", id.name, id.version)
    }

    fn poisoned(e: impl std::fmt::Display) -> RuntimeError {
        RuntimeError::LockPoisoned(format!("dependency exporter: {e}"))
    }
}

#[async_trait]
impl DependencyExporter for BlobDependencyExporter {
    async fn publish(&self, id: &DependencyId, image: Vec<u8>) -> Result<(), RuntimeError> {
        debug!(dependency = %id, bytes = image.len(), "publishing dependency");
        self.blobs.put(&Self::key(id), image).await?;
        Ok(())
    }

    async fn load_dependencies(&self, ids: &[DependencyId]) -> Result<(), RuntimeError> {
        for id in ids {
            if self.is_loaded(id).await? {
                continue;
            }
            let key = Self::key(id);
            if !self.blobs.exists(&key).await? {
                return Err(RuntimeError::MissingDependency(id.to_string()));
            }
            let image = self.blobs.get(&key).await?;
            debug!(dependency = %id, bytes = image.len(), "loaded dependency");
            self.loaded.write().map_err(Self::poisoned)?.insert(id.clone());
        }
        Ok(())
    }

    async fn is_loaded(&self, id: &DependencyId) -> Result<bool, RuntimeError> {
        Ok(self.loaded.read().map_err(Self::poisoned)?.contains(id))
    }
}
