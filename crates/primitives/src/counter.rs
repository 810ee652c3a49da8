//! Distributed atomic counters.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use nimbus_core::CounterId;

use crate::error::PrimitiveError;

#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn create_counter(&self, initial: i64) -> Result<CounterId, PrimitiveError>;

    /// Atomically subtract one and return the new value.
    async fn decrement(&self, id: CounterId) -> Result<i64, PrimitiveError>;

    async fn value(&self, id: CounterId) -> Result<i64, PrimitiveError>;

    /// Remove the counter. Disposing an unknown counter is a no-op.
    async fn dispose(&self, id: CounterId) -> Result<(), PrimitiveError>;
}

#[derive(Default)]
pub struct MemoryCounterStore {
    counters: RwLock<HashMap<CounterId, i64>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, id: CounterId, delta: i64) -> Result<i64, PrimitiveError> {
        let mut counters = self
            .counters
            .write()
            .map_err(|e| PrimitiveError::poisoned("counter store", e))?;
        let value = counters
            .get_mut(&id)
            .ok_or_else(|| PrimitiveError::not_found("counter", id))?;
        *value += delta;
        Ok(*value)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn create_counter(&self, initial: i64) -> Result<CounterId, PrimitiveError> {
        let id = CounterId::new();
        self.counters
            .write()
            .map_err(|e| PrimitiveError::poisoned("counter store", e))?
            .insert(id, initial);
        Ok(id)
    }

    async fn decrement(&self, id: CounterId) -> Result<i64, PrimitiveError> {
        self.update(id, -1)
    }

    async fn value(&self, id: CounterId) -> Result<i64, PrimitiveError> {
        self.counters
            .read()
            .map_err(|e| PrimitiveError::poisoned("counter store", e))?
            .get(&id)
            .copied()
            .ok_or_else(|| PrimitiveError::not_found("counter", id))
    }

    async fn dispose(&self, id: CounterId) -> Result<(), PrimitiveError> {
        self.counters
            .write()
            .map_err(|e| PrimitiveError::poisoned("counter store", e))?
            .remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn decrement_returns_new_value() {
        let store = MemoryCounterStore::new();
        let id = store.create_counter(2).await.unwrap();
        assert_eq!(store.decrement(id).await.unwrap(), 1);
        assert_eq!(store.decrement(id).await.unwrap(), 0);
        assert_eq!(store.value(id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_decrements_hit_zero_exactly_once() {
        let store = Arc::new(MemoryCounterStore::new());
        let id = store.create_counter(50).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.decrement(id).await.unwrap() }));
        }

        let mut zeros = 0;
        for h in handles {
            if h.await.unwrap() == 0 {
                zeros += 1;
            }
        }
        assert_eq!(zeros, 1);
    }

    #[tokio::test]
    async fn unknown_counter_is_not_found() {
        let store = MemoryCounterStore::new();
        assert!(store.value(CounterId::new()).await.is_err());

        let id = store.create_counter(1).await.unwrap();
        store.dispose(id).await.unwrap();
        assert!(store.decrement(id).await.is_err());
    }
}
