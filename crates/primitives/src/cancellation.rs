//! Distributed cancellation token sources.
//!
//! Sources form a tree: a source created with a parent reports itself
//! cancelled as soon as any ancestor is. Cancellation is cooperative; it is
//! observed at suspension points, never forced on running code.
//!
//! A disposed source reads as cancelled, and so does every source below it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use nimbus_core::CancellationId;

use crate::error::PrimitiveError;

#[async_trait]
pub trait CancellationStore: Send + Sync {
    /// Create a source, optionally linked to a parent source.
    async fn create(&self, parent: Option<CancellationId>) -> Result<CancellationId, PrimitiveError>;

    /// Trigger cancellation. Idempotent; cancelling a disposed source does nothing.
    async fn cancel(&self, id: CancellationId) -> Result<(), PrimitiveError>;

    /// Whether the source or any of its ancestors has been cancelled or disposed.
    async fn is_cancelled(&self, id: CancellationId) -> Result<bool, PrimitiveError>;

    /// Remove the source. Sources linked below it stay and read as cancelled.
    async fn dispose(&self, id: CancellationId) -> Result<(), PrimitiveError>;
}

#[derive(Debug, Clone, Copy)]
struct SourceNode {
    parent: Option<CancellationId>,
    cancelled: bool,
}

#[derive(Default)]
pub struct MemoryCancellationStore {
    nodes: RwLock<HashMap<CancellationId, SourceNode>>,
}

impl MemoryCancellationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CancellationStore for MemoryCancellationStore {
    async fn create(&self, parent: Option<CancellationId>) -> Result<CancellationId, PrimitiveError> {
        let mut nodes = self
            .nodes
            .write()
            .map_err(|e| PrimitiveError::poisoned("cancellation store", e))?;
        if let Some(parent) = parent {
            if !nodes.contains_key(&parent) {
                return Err(PrimitiveError::not_found("cancellation source", parent));
            }
        }
        let id = CancellationId::new();
        nodes.insert(id, SourceNode { parent, cancelled: false });
        Ok(id)
    }

    async fn cancel(&self, id: CancellationId) -> Result<(), PrimitiveError> {
        let mut nodes = self
            .nodes
            .write()
            .map_err(|e| PrimitiveError::poisoned("cancellation store", e))?;
        if let Some(node) = nodes.get_mut(&id) {
            if !node.cancelled {
                tracing::debug!(cancellation_id = %id, "cancellation requested");
            }
            node.cancelled = true;
        }
        Ok(())
    }

    async fn is_cancelled(&self, id: CancellationId) -> Result<bool, PrimitiveError> {
        let nodes = self
            .nodes
            .read()
            .map_err(|e| PrimitiveError::poisoned("cancellation store", e))?;
        let mut current = Some(id);
        while let Some(cursor) = current {
            let Some(node) = nodes.get(&cursor) else {
                return Ok(true);
            };
            if node.cancelled {
                return Ok(true);
            }
            current = node.parent;
        }
        Ok(false)
    }

    async fn dispose(&self, id: CancellationId) -> Result<(), PrimitiveError> {
        self.nodes
            .write()
            .map_err(|e| PrimitiveError::poisoned("cancellation store", e))?
            .remove(&id);
        Ok(())
    }
}

/// Client handle to one distributed cancellation token source.
#[derive(Clone)]
pub struct CancellationTokenSource {
    id: CancellationId,
    store: Arc<dyn CancellationStore>,
}

impl CancellationTokenSource {
    pub fn new(id: CancellationId, store: Arc<dyn CancellationStore>) -> Self {
        Self { id, store }
    }

    /// Create a brand-new root source.
    pub async fn create(store: Arc<dyn CancellationStore>) -> Result<Self, PrimitiveError> {
        let id = store.create(None).await?;
        Ok(Self { id, store })
    }

    /// Create a child source that is cancelled whenever this one is.
    pub async fn create_linked(&self) -> Result<Self, PrimitiveError> {
        let id = self.store.create(Some(self.id)).await?;
        Ok(Self {
            id,
            store: self.store.clone(),
        })
    }

    pub fn id(&self) -> CancellationId {
        self.id
    }

    pub async fn cancel(&self) -> Result<(), PrimitiveError> {
        self.store.cancel(self.id).await
    }

    pub async fn is_cancelled(&self) -> Result<bool, PrimitiveError> {
        self.store.is_cancelled(self.id).await
    }

    pub async fn dispose(&self) -> Result<(), PrimitiveError> {
        self.store.dispose(self.id).await
    }

    /// A token for observing this source from local code.
    pub fn local_token(&self, poll: Duration) -> LocalCancellationToken {
        LocalCancellationToken {
            source: self.clone(),
            poll,
        }
    }
}

impl std::fmt::Debug for CancellationTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("CancellationTokenSource").field(&self.id).finish()
    }
}

/// Observer side of a [`CancellationTokenSource`]; cannot trigger cancellation.
#[derive(Clone, Debug)]
pub struct LocalCancellationToken {
    source: CancellationTokenSource,
    poll: Duration,
}

impl LocalCancellationToken {
    pub async fn is_cancelled(&self) -> Result<bool, PrimitiveError> {
        self.source.is_cancelled().await
    }

    /// Resolve once the source (or an ancestor) is cancelled.
    pub async fn cancelled(&self) -> Result<(), PrimitiveError> {
        while !self.source.is_cancelled().await? {
            tokio::time::sleep(self.poll).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<dyn CancellationStore> {
        Arc::new(MemoryCancellationStore::new())
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let cts = CancellationTokenSource::create(store()).await.unwrap();
        assert!(!cts.is_cancelled().await.unwrap());
        cts.cancel().await.unwrap();
        cts.cancel().await.unwrap();
        assert!(cts.is_cancelled().await.unwrap());
    }

    #[tokio::test]
    async fn child_observes_parent_cancellation() {
        let parent = CancellationTokenSource::create(store()).await.unwrap();
        let child = parent.create_linked().await.unwrap();
        let grandchild = child.create_linked().await.unwrap();

        parent.cancel().await.unwrap();
        assert!(child.is_cancelled().await.unwrap());
        assert!(grandchild.is_cancelled().await.unwrap());
    }

    #[tokio::test]
    async fn child_cancellation_does_not_reach_parent() {
        let parent = CancellationTokenSource::create(store()).await.unwrap();
        let a = parent.create_linked().await.unwrap();
        let b = parent.create_linked().await.unwrap();

        a.cancel().await.unwrap();
        assert!(!parent.is_cancelled().await.unwrap());
        assert!(!b.is_cancelled().await.unwrap());
    }

    #[tokio::test]
    async fn disposed_source_reads_as_cancelled_below() {
        let parent = CancellationTokenSource::create(store()).await.unwrap();
        let scope = parent.create_linked().await.unwrap();
        let straggler = scope.create_linked().await.unwrap();

        scope.dispose().await.unwrap();
        scope.cancel().await.unwrap();
        assert!(scope.is_cancelled().await.unwrap());
        assert!(straggler.is_cancelled().await.unwrap());
        assert!(!parent.is_cancelled().await.unwrap());
    }

    #[tokio::test]
    async fn linking_to_unknown_parent_fails() {
        let s = store();
        assert!(s.create(Some(CancellationId::new())).await.is_err());
    }

    #[tokio::test]
    async fn local_token_resolves_after_cancel() {
        let cts = CancellationTokenSource::create(store()).await.unwrap();
        let token = cts.local_token(Duration::from_millis(5));

        let trigger = cts.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel().await.unwrap();
        });

        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("token should observe cancellation")
            .unwrap();
        assert!(token.is_cancelled().await.unwrap());
    }
}
