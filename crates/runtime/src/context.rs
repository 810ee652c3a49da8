//! The handle a workflow body receives.

use serde::de::DeserializeOwned;

use nimbus_core::{Payload, ProcessId, TaskId};
use nimbus_primitives::WorkerRef;

use crate::error::RuntimeError;
use crate::monitor::CompletionMonitor;
use crate::provider::{ChildHandle, RuntimeProvider, SchedulingContext};
use crate::workflow::WorkflowCall;

/// Execution context of one running task: its scheduling provider and the
/// completion monitor it owns.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    provider: RuntimeProvider,
    monitor: CompletionMonitor,
    task_id: TaskId,
}

impl ExecutionContext {
    pub fn new(provider: RuntimeProvider, monitor: CompletionMonitor, task_id: TaskId) -> Self {
        Self {
            provider,
            monitor,
            task_id,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn process_id(&self) -> ProcessId {
        self.provider.process_id()
    }

    pub fn provider(&self) -> &RuntimeProvider {
        &self.provider
    }

    pub fn monitor(&self) -> &CompletionMonitor {
        &self.monitor
    }

    pub fn scheduling_context(&self) -> SchedulingContext {
        self.provider.scheduling_context()
    }

    /// Same task, with nested scheduling switched to `context`.
    pub fn with_scheduling_context(&self, context: SchedulingContext) -> Self {
        Self {
            provider: self.provider.with_scheduling_context(context),
            ..self.clone()
        }
    }

    pub async fn is_cancelled(&self) -> Result<bool, RuntimeError> {
        Ok(self.provider.cancellation().is_cancelled().await?)
    }

    /// Cooperative cancellation point: fails with `Cancelled` once the
    /// task's cancellation source has been triggered.
    pub async fn check_cancelled(&self) -> Result<(), RuntimeError> {
        if self.is_cancelled().await? {
            return Err(RuntimeError::Cancelled(format!("{} observed cancellation", self.task_id)));
        }
        Ok(())
    }

    pub async fn parallel(&self, calls: Vec<WorkflowCall>) -> Result<Vec<Payload>, RuntimeError> {
        self.check_cancelled().await?;
        self.provider.schedule_parallel(calls).await
    }

    pub async fn parallel_as<T: DeserializeOwned>(&self, calls: Vec<WorkflowCall>) -> Result<Vec<T>, RuntimeError> {
        self.parallel(calls)
            .await?
            .iter()
            .map(|value| value.decode().map_err(RuntimeError::from))
            .collect()
    }

    pub async fn choice(&self, calls: Vec<WorkflowCall>) -> Result<Payload, RuntimeError> {
        self.check_cancelled().await?;
        self.provider.schedule_choice(calls).await
    }

    pub async fn choice_as<T: DeserializeOwned>(&self, calls: Vec<WorkflowCall>) -> Result<T, RuntimeError> {
        Ok(self.choice(calls).await?.decode()?)
    }

    pub async fn start_child(&self, call: WorkflowCall) -> Result<ChildHandle, RuntimeError> {
        self.check_cancelled().await?;
        self.provider.schedule_start_child(call).await
    }

    pub async fn available_workers(&self) -> Result<Vec<WorkerRef>, RuntimeError> {
        self.provider.available_workers().await
    }
}
