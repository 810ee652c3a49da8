//! Write-once result cells.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use nimbus_core::{CellId, Outcome, ProcessId};

use crate::error::PrimitiveError;

/// Storage for result cells.
///
/// A cell holds at most one [`Outcome`]. The first `set_result` wins; later
/// writes are ignored and report `false`.
#[async_trait]
pub trait ResultCellStore: Send + Sync {
    /// Allocate an empty cell owned by `process`.
    async fn create_cell(&self, process: ProcessId) -> Result<CellId, PrimitiveError>;

    /// Write the cell's outcome. Returns `true` if this call performed the write.
    async fn set_result(&self, cell: CellId, outcome: Outcome) -> Result<bool, PrimitiveError>;

    /// Current value of the cell, `None` while it is still empty.
    async fn try_get(&self, cell: CellId) -> Result<Option<Outcome>, PrimitiveError>;

    /// Remove the cell. Disposing an unknown cell is a no-op.
    async fn dispose(&self, cell: CellId) -> Result<(), PrimitiveError>;
}

#[derive(Default)]
pub struct MemoryCellStore {
    cells: RwLock<HashMap<CellId, Option<Outcome>>>,
}

impl MemoryCellStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultCellStore for MemoryCellStore {
    async fn create_cell(&self, _process: ProcessId) -> Result<CellId, PrimitiveError> {
        let id = CellId::new();
        self.cells
            .write()
            .map_err(|e| PrimitiveError::poisoned("cell store", e))?
            .insert(id, None);
        Ok(id)
    }

    async fn set_result(&self, cell: CellId, outcome: Outcome) -> Result<bool, PrimitiveError> {
        let mut cells = self
            .cells
            .write()
            .map_err(|e| PrimitiveError::poisoned("cell store", e))?;
        let slot = cells
            .get_mut(&cell)
            .ok_or_else(|| PrimitiveError::not_found("result cell", cell))?;
        if slot.is_some() {
            return Ok(false);
        }
        *slot = Some(outcome);
        Ok(true)
    }

    async fn try_get(&self, cell: CellId) -> Result<Option<Outcome>, PrimitiveError> {
        let cells = self
            .cells
            .read()
            .map_err(|e| PrimitiveError::poisoned("cell store", e))?;
        cells
            .get(&cell)
            .cloned()
            .ok_or_else(|| PrimitiveError::not_found("result cell", cell))
    }

    async fn dispose(&self, cell: CellId) -> Result<(), PrimitiveError> {
        self.cells
            .write()
            .map_err(|e| PrimitiveError::poisoned("cell store", e))?
            .remove(&cell);
        Ok(())
    }
}

/// Client handle to one result cell.
#[derive(Clone)]
pub struct ResultCell {
    id: CellId,
    store: Arc<dyn ResultCellStore>,
}

impl ResultCell {
    pub fn new(id: CellId, store: Arc<dyn ResultCellStore>) -> Self {
        Self { id, store }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub async fn set_result(&self, outcome: Outcome) -> Result<bool, PrimitiveError> {
        self.store.set_result(self.id, outcome).await
    }

    /// Current value without waiting.
    pub async fn try_value(&self) -> Result<Option<Outcome>, PrimitiveError> {
        self.store.try_get(self.id).await
    }

    /// Poll until the cell holds an outcome.
    pub async fn value(&self, poll: Duration) -> Result<Outcome, PrimitiveError> {
        loop {
            if let Some(outcome) = self.try_value().await? {
                return Ok(outcome);
            }
            tokio::time::sleep(poll).await;
        }
    }

    pub async fn dispose(&self) -> Result<(), PrimitiveError> {
        self.store.dispose(self.id).await
    }
}

impl std::fmt::Debug for ResultCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ResultCell").field(&self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::{Payload, TaskFault};

    #[tokio::test]
    async fn first_write_wins() {
        let store = MemoryCellStore::new();
        let cell = store.create_cell(ProcessId::new()).await.unwrap();
        assert_eq!(store.try_get(cell).await.unwrap(), None);

        let first = Outcome::Completed(Payload::encode(&1u8).unwrap());
        assert!(store.set_result(cell, first.clone()).await.unwrap());
        assert!(!store
            .set_result(cell, Outcome::Exception(TaskFault::failed("x", "late")))
            .await
            .unwrap());
        assert_eq!(store.try_get(cell).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn unknown_cell_is_not_found() {
        let store = MemoryCellStore::new();
        assert!(matches!(
            store.try_get(CellId::new()).await,
            Err(PrimitiveError::NotFound { kind: "result cell", .. })
        ));
    }

    #[tokio::test]
    async fn disposed_cell_is_gone() {
        let store = MemoryCellStore::new();
        let cell = store.create_cell(ProcessId::new()).await.unwrap();
        store.dispose(cell).await.unwrap();
        store.dispose(cell).await.unwrap();
        assert!(matches!(
            store.set_result(cell, Outcome::Cancelled("late".into())).await,
            Err(PrimitiveError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn handle_waits_for_value() {
        let store: Arc<dyn ResultCellStore> = Arc::new(MemoryCellStore::new());
        let id = store.create_cell(ProcessId::new()).await.unwrap();
        let cell = ResultCell::new(id, store.clone());

        let writer = cell.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.set_result(Outcome::Cancelled("stop".into())).await.unwrap();
        });

        let outcome = tokio::time::timeout(Duration::from_secs(2), cell.value(Duration::from_millis(5)))
            .await
            .expect("cell should be written")
            .unwrap();
        assert_eq!(outcome, Outcome::Cancelled("stop".into()));
    }
}
