//! Client-side handles to submitted work.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use nimbus_core::{Outcome, Payload, ProcessId};
use nimbus_primitives::{CancellationTokenSource, ProcessInfo, ProcessMonitor, ProcessRecord, ProcessStatus, ResultCell};

use crate::error::RuntimeError;

/// The value of a completed outcome; faults and cancellations become errors.
pub fn outcome_value(outcome: Outcome) -> Result<Payload, RuntimeError> {
    match outcome {
        Outcome::Completed(value) => Ok(value),
        Outcome::Exception(fault) => Err(RuntimeError::Faulted(fault)),
        Outcome::Cancelled(reason) => Err(RuntimeError::Cancelled(reason)),
    }
}

/// Turn a terminal outcome into a typed result.
pub fn decode_outcome<T: DeserializeOwned>(outcome: Outcome) -> Result<T, RuntimeError> {
    Ok(outcome_value(outcome)?.decode()?)
}

/// Handle to a task submitted with `start_as_cell`.
pub struct CellHandle<T> {
    cell: ResultCell,
    poll: Duration,
    _result: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> CellHandle<T> {
    pub(crate) fn new(cell: ResultCell, poll: Duration) -> Self {
        Self {
            cell,
            poll,
            _result: PhantomData,
        }
    }

    pub fn cell(&self) -> &ResultCell {
        &self.cell
    }

    pub async fn try_outcome(&self) -> Result<Option<Outcome>, RuntimeError> {
        Ok(self.cell.try_value().await?)
    }

    pub async fn outcome(&self) -> Result<Outcome, RuntimeError> {
        Ok(self.cell.value(self.poll).await?)
    }

    /// Wait for the cell and decode its value.
    pub async fn result(&self) -> Result<T, RuntimeError> {
        decode_outcome(self.outcome().await?)
    }
}

/// Handle to a process submitted with `start_as_process`.
pub struct ProcessHandle<T> {
    info: ProcessInfo,
    cell: ResultCell,
    cancellation: CancellationTokenSource,
    processes: Arc<dyn ProcessMonitor>,
    poll: Duration,
    _result: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> ProcessHandle<T> {
    pub(crate) fn new(
        info: ProcessInfo,
        cell: ResultCell,
        cancellation: CancellationTokenSource,
        processes: Arc<dyn ProcessMonitor>,
        poll: Duration,
    ) -> Self {
        Self {
            info,
            cell,
            cancellation,
            processes,
            poll,
            _result: PhantomData,
        }
    }

    pub fn id(&self) -> ProcessId {
        self.info.process_id
    }

    pub fn info(&self) -> &ProcessInfo {
        &self.info
    }

    pub async fn record(&self) -> Result<ProcessRecord, RuntimeError> {
        Ok(self.processes.get_record(self.info.process_id).await?)
    }

    pub async fn status(&self) -> Result<ProcessStatus, RuntimeError> {
        Ok(self.record().await?.status)
    }

    /// Request cooperative cancellation of the whole process tree.
    pub async fn cancel(&self) -> Result<(), RuntimeError> {
        Ok(self.cancellation.cancel().await?)
    }

    pub async fn try_outcome(&self) -> Result<Option<Outcome>, RuntimeError> {
        Ok(self.cell.try_value().await?)
    }

    /// Wait until the record is terminal, then read the cell.
    pub async fn outcome(&self) -> Result<Outcome, RuntimeError> {
        loop {
            if self.status().await?.is_terminal() {
                return self.try_outcome().await?.ok_or_else(|| {
                    RuntimeError::InvalidOperation(format!(
                        "process {} is terminal but its cell is empty",
                        self.info.process_id
                    ))
                });
            }
            tokio::time::sleep(self.poll).await;
        }
    }

    pub async fn result(&self) -> Result<T, RuntimeError> {
        decode_outcome(self.outcome().await?)
    }
}

impl<T> std::fmt::Debug for ProcessHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("process_id", &self.info.process_id)
            .field("name", &self.info.name)
            .finish()
    }
}
