//! Process records and the monitor that tracks their lifecycle.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nimbus_core::{CancellationId, CellId, ProcessId};

use crate::error::PrimitiveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    Created,
    Running,
    Completed,
    Faulted,
    Killed,
}

impl ProcessStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Faulted | Self::Killed)
    }

    fn can_move_to(self, next: ProcessStatus) -> bool {
        match self {
            Self::Created => true,
            Self::Running => next != Self::Created,
            Self::Completed | Self::Faulted | Self::Killed => false,
        }
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Faulted => "faulted",
            Self::Killed => "killed",
        };
        f.write_str(s)
    }
}

/// Static description of a process, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub process_id: ProcessId,
    pub name: String,
    /// Name of the type the process returns, for display.
    pub result_type: String,
    pub cancellation: CancellationId,
    pub cell: CellId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub info: ProcessInfo,
    pub status: ProcessStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Registry of process records.
///
/// Status only moves forward: `Created -> Running -> {Completed, Faulted, Killed}`,
/// with `Created` allowed to skip straight to a terminal state. Once terminal a
/// record never changes again.
#[async_trait]
pub trait ProcessMonitor: Send + Sync {
    async fn create_record(&self, info: ProcessInfo) -> Result<ProcessRecord, PrimitiveError>;

    async fn get_record(&self, process: ProcessId) -> Result<ProcessRecord, PrimitiveError>;

    async fn list_records(&self) -> Result<Vec<ProcessRecord>, PrimitiveError>;

    async fn set_running(&self, process: ProcessId) -> Result<(), PrimitiveError>;

    async fn set_completed(&self, process: ProcessId) -> Result<(), PrimitiveError>;

    async fn set_faulted(&self, process: ProcessId) -> Result<(), PrimitiveError>;

    async fn set_killed(&self, process: ProcessId) -> Result<(), PrimitiveError>;
}

#[derive(Default)]
pub struct MemoryProcessMonitor {
    records: RwLock<HashMap<ProcessId, ProcessRecord>>,
}

impl MemoryProcessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(&self, process: ProcessId, next: ProcessStatus) -> Result<(), PrimitiveError> {
        let mut records = self
            .records
            .write()
            .map_err(|e| PrimitiveError::poisoned("process monitor", e))?;
        let record = records
            .get_mut(&process)
            .ok_or_else(|| PrimitiveError::not_found("process", process))?;

        if record.status == next && next == ProcessStatus::Running {
            return Ok(());
        }
        if !record.status.can_move_to(next) {
            return Err(PrimitiveError::InvalidTransition {
                process: process.to_string(),
                from: record.status,
                to: next,
            });
        }

        let now = Utc::now();
        if next == ProcessStatus::Running {
            record.started_at = Some(now);
        } else if next.is_terminal() {
            record.completed_at = Some(now);
        }
        tracing::debug!(process_id = %process, from = %record.status, to = %next, "process transition");
        record.status = next;
        Ok(())
    }
}

#[async_trait]
impl ProcessMonitor for MemoryProcessMonitor {
    async fn create_record(&self, info: ProcessInfo) -> Result<ProcessRecord, PrimitiveError> {
        let record = ProcessRecord {
            info,
            status: ProcessStatus::Created,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        self.records
            .write()
            .map_err(|e| PrimitiveError::poisoned("process monitor", e))?
            .insert(record.info.process_id, record.clone());
        Ok(record)
    }

    async fn get_record(&self, process: ProcessId) -> Result<ProcessRecord, PrimitiveError> {
        self.records
            .read()
            .map_err(|e| PrimitiveError::poisoned("process monitor", e))?
            .get(&process)
            .cloned()
            .ok_or_else(|| PrimitiveError::not_found("process", process))
    }

    async fn list_records(&self) -> Result<Vec<ProcessRecord>, PrimitiveError> {
        let records = self
            .records
            .read()
            .map_err(|e| PrimitiveError::poisoned("process monitor", e))?;
        let mut out: Vec<_> = records.values().cloned().collect();
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }

    async fn set_running(&self, process: ProcessId) -> Result<(), PrimitiveError> {
        self.transition(process, ProcessStatus::Running)
    }

    async fn set_completed(&self, process: ProcessId) -> Result<(), PrimitiveError> {
        self.transition(process, ProcessStatus::Completed)
    }

    async fn set_faulted(&self, process: ProcessId) -> Result<(), PrimitiveError> {
        self.transition(process, ProcessStatus::Faulted)
    }

    async fn set_killed(&self, process: ProcessId) -> Result<(), PrimitiveError> {
        self.transition(process, ProcessStatus::Killed)
    }
}
