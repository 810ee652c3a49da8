//! Registry of workers subscribed to a runtime.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nimbus_core::WorkerId;

use crate::error::PrimitiveError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRef {
    pub id: WorkerId,
    pub name: String,
    pub max_tasks: usize,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl WorkerRef {
    pub fn new(id: WorkerId, name: impl Into<String>, max_tasks: usize) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            max_tasks,
            registered_at: now,
            last_seen: now,
        }
    }
}

#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    /// Add or replace a worker entry.
    async fn register(&self, worker: WorkerRef) -> Result<(), PrimitiveError>;

    async fn unregister(&self, id: &WorkerId) -> Result<(), PrimitiveError>;

    /// Refresh `last_seen` for a registered worker.
    async fn heartbeat(&self, id: &WorkerId) -> Result<(), PrimitiveError>;

    async fn get_all_workers(&self) -> Result<Vec<WorkerRef>, PrimitiveError>;
}

#[derive(Default)]
pub struct MemoryWorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerRef>>,
}

impl MemoryWorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkerRegistry for MemoryWorkerRegistry {
    async fn register(&self, worker: WorkerRef) -> Result<(), PrimitiveError> {
        self.workers
            .write()
            .map_err(|e| PrimitiveError::poisoned("worker registry", e))?
            .insert(worker.id.clone(), worker);
        Ok(())
    }

    async fn unregister(&self, id: &WorkerId) -> Result<(), PrimitiveError> {
        self.workers
            .write()
            .map_err(|e| PrimitiveError::poisoned("worker registry", e))?
            .remove(id);
        Ok(())
    }

    async fn heartbeat(&self, id: &WorkerId) -> Result<(), PrimitiveError> {
        let mut workers = self
            .workers
            .write()
            .map_err(|e| PrimitiveError::poisoned("worker registry", e))?;
        let worker = workers
            .get_mut(id)
            .ok_or_else(|| PrimitiveError::not_found("worker", id))?;
        worker.last_seen = Utc::now();
        Ok(())
    }

    async fn get_all_workers(&self) -> Result<Vec<WorkerRef>, PrimitiveError> {
        let workers = self
            .workers
            .read()
            .map_err(|e| PrimitiveError::poisoned("worker registry", e))?;
        let mut out: Vec<_> = workers.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_heartbeat_unregister() {
        let registry = MemoryWorkerRegistry::new();
        let id = WorkerId::new("worker-a");
        registry.register(WorkerRef::new(id.clone(), "a", 4)).await.unwrap();

        let before = registry.get_all_workers().await.unwrap()[0].last_seen;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        registry.heartbeat(&id).await.unwrap();
        let after = registry.get_all_workers().await.unwrap()[0].last_seen;
        assert!(after >= before);

        registry.unregister(&id).await.unwrap();
        assert!(registry.get_all_workers().await.unwrap().is_empty());
        assert!(registry.heartbeat(&id).await.is_err());
    }

    #[tokio::test]
    async fn workers_are_listed_by_id() {
        let registry = MemoryWorkerRegistry::new();
        for name in ["worker-c", "worker-a", "worker-b"] {
            registry
                .register(WorkerRef::new(WorkerId::new(name), name, 1))
                .await
                .unwrap();
        }
        let ids: Vec<_> = registry
            .get_all_workers()
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.id.to_string())
            .collect();
        assert_eq!(ids, vec!["worker-a", "worker-b", "worker-c"]);
    }
}
