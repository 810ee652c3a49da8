//! Fixed-size result aggregators used by fan-out combinators.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use nimbus_core::{AggregatorId, Payload};

use crate::error::PrimitiveError;

/// An aggregator is an array of `capacity` write-once slots.
#[async_trait]
pub trait AggregatorStore: Send + Sync {
    async fn create(&self, capacity: usize) -> Result<AggregatorId, PrimitiveError>;

    /// Fill slot `index`. Returns `true` if this call performed the write.
    async fn set(&self, id: AggregatorId, index: usize, value: Payload) -> Result<bool, PrimitiveError>;

    /// All slot values in index order, or `None` while any slot is empty.
    async fn values(&self, id: AggregatorId) -> Result<Option<Vec<Payload>>, PrimitiveError>;

    /// Remove the aggregator. Disposing an unknown aggregator is a no-op.
    async fn dispose(&self, id: AggregatorId) -> Result<(), PrimitiveError>;
}

#[derive(Default)]
pub struct MemoryAggregatorStore {
    aggregators: RwLock<HashMap<AggregatorId, Vec<Option<Payload>>>>,
}

impl MemoryAggregatorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AggregatorStore for MemoryAggregatorStore {
    async fn create(&self, capacity: usize) -> Result<AggregatorId, PrimitiveError> {
        let id = AggregatorId::new();
        self.aggregators
            .write()
            .map_err(|e| PrimitiveError::poisoned("aggregator store", e))?
            .insert(id, vec![None; capacity]);
        Ok(id)
    }

    async fn set(&self, id: AggregatorId, index: usize, value: Payload) -> Result<bool, PrimitiveError> {
        let mut aggregators = self
            .aggregators
            .write()
            .map_err(|e| PrimitiveError::poisoned("aggregator store", e))?;
        let slots = aggregators
            .get_mut(&id)
            .ok_or_else(|| PrimitiveError::not_found("aggregator", id))?;
        let capacity = slots.len();
        let slot = slots
            .get_mut(index)
            .ok_or(PrimitiveError::SlotOutOfRange { index, capacity })?;
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(value);
        Ok(true)
    }

    async fn values(&self, id: AggregatorId) -> Result<Option<Vec<Payload>>, PrimitiveError> {
        let aggregators = self
            .aggregators
            .read()
            .map_err(|e| PrimitiveError::poisoned("aggregator store", e))?;
        let slots = aggregators
            .get(&id)
            .ok_or_else(|| PrimitiveError::not_found("aggregator", id))?;
        Ok(slots.iter().cloned().collect())
    }

    async fn dispose(&self, id: AggregatorId) -> Result<(), PrimitiveError> {
        self.aggregators
            .write()
            .map_err(|e| PrimitiveError::poisoned("aggregator store", e))?
            .remove(&id);
        Ok(())
    }
}
