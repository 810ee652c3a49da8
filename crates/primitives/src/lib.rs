//! Distributed primitives the scheduling core coordinates through.
//!
//! Each primitive is a trait describing the client contract plus an
//! in-memory backend. Remote backends implement the same traits.

pub mod aggregator;
pub mod cancellation;
pub mod cell;
pub mod counter;
pub mod error;
pub mod process;
pub mod registry;

use std::sync::Arc;

pub use aggregator::{AggregatorStore, MemoryAggregatorStore};
pub use cancellation::{CancellationStore, CancellationTokenSource, LocalCancellationToken, MemoryCancellationStore};
pub use cell::{MemoryCellStore, ResultCell, ResultCellStore};
pub use counter::{CounterStore, MemoryCounterStore};
pub use error::PrimitiveError;
pub use process::{MemoryProcessMonitor, ProcessInfo, ProcessMonitor, ProcessRecord, ProcessStatus};
pub use registry::{MemoryWorkerRegistry, WorkerRef, WorkerRegistry};

/// Every primitive backend a runtime needs, as named, typed fields.
#[derive(Clone)]
pub struct Resources {
    pub cells: Arc<dyn ResultCellStore>,
    pub cancellation: Arc<dyn CancellationStore>,
    pub counters: Arc<dyn CounterStore>,
    pub aggregators: Arc<dyn AggregatorStore>,
    pub processes: Arc<dyn ProcessMonitor>,
    pub workers: Arc<dyn WorkerRegistry>,
}

impl Resources {
    /// Fresh in-memory backends for every primitive.
    pub fn in_memory() -> Self {
        Self {
            cells: Arc::new(MemoryCellStore::new()),
            cancellation: Arc::new(MemoryCancellationStore::new()),
            counters: Arc::new(MemoryCounterStore::new()),
            aggregators: Arc::new(MemoryAggregatorStore::new()),
            processes: Arc::new(MemoryProcessMonitor::new()),
            workers: Arc::new(MemoryWorkerRegistry::new()),
        }
    }

    /// Handle to an existing cancellation token source.
    pub fn cancellation_source(&self, id: nimbus_core::CancellationId) -> CancellationTokenSource {
        CancellationTokenSource::new(id, self.cancellation.clone())
    }

    /// Handle to an existing result cell.
    pub fn cell(&self, id: nimbus_core::CellId) -> ResultCell {
        ResultCell::new(id, self.cells.clone())
    }
}
