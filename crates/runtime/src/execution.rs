//! Running a dequeued task on a worker.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::debug;

use nimbus_core::{DependencyId, Outcome, Payload, ProcessId, TaskFault};
use nimbus_primitives::{PrimitiveError, Resources};

use crate::context::ExecutionContext;
use crate::continuation;
use crate::error::RuntimeError;
use crate::monitor::{CompletionMonitor, CompletionState};
use crate::provider::RuntimeProvider;
use crate::slot::SlotHandle;
use crate::state::RuntimeState;
use crate::task::Task;
use crate::workflow::{Workflow, WorkflowRegistry};

/// Run a workflow body, turning its result, error or panic into an outcome.
pub(crate) async fn run_body(workflow: Arc<dyn Workflow>, ctx: ExecutionContext, input: Payload) -> Outcome {
    match AssertUnwindSafe(workflow.run(ctx, input)).catch_unwind().await {
        Ok(Ok(value)) => Outcome::Completed(value),
        Ok(Err(RuntimeError::Cancelled(reason))) => Outcome::Cancelled(reason),
        Ok(Err(e)) => Outcome::Exception(e.into()),
        Err(panic) => Outcome::Exception(TaskFault::from_panic(panic)),
    }
}

/// Start a task: run its body, apply the continuation for the outcome and
/// settle the task's completion monitor.
///
/// `slot` is the worker capacity the task occupies; it is suspended while
/// the body waits on children it queued.
///
/// `Ok` carries the outcome the continuation recorded. A body that faulted
/// its own monitor is recorded as that fault. `Err` means the continuation
/// plumbing itself failed and the outcome may not have been recorded anywhere.
pub async fn execute_task(
    state: &RuntimeState,
    registry: &Arc<WorkflowRegistry>,
    task: Task,
    dependencies: Vec<DependencyId>,
    slot: SlotHandle,
) -> Result<Outcome, RuntimeError> {
    let monitor = CompletionMonitor::new();
    let started = start(state, registry, task, dependencies, slot, monitor.clone());
    if let Some(outcome) = monitor.protect_async(started).await {
        monitor.trigger_completion();
        return Ok(outcome);
    }
    monitor.await_completion().await?;
    Err(RuntimeError::InvalidOperation("task completed without an outcome".into()))
}

async fn start(
    state: &RuntimeState,
    registry: &Arc<WorkflowRegistry>,
    task: Task,
    dependencies: Vec<DependencyId>,
    slot: SlotHandle,
    monitor: CompletionMonitor,
) -> Result<Outcome, RuntimeError> {
    let resources = state.resources();
    let cancellation = resources.cancellation_source(task.cancellation);

    let outcome = if cancellation.is_cancelled().await? {
        Outcome::Cancelled(format!("{} cancelled before start", task.task_id))
    } else {
        if task.process_root {
            mark_running(resources, task.process_id).await?;
        }
        let provider = RuntimeProvider::new(
            state.clone(),
            registry.clone(),
            task.process_id,
            dependencies,
            cancellation,
        )
        .with_slot(slot);
        let ctx = ExecutionContext::new(provider, monitor.clone(), task.task_id);
        let outcome = match registry.resolve(&task.call) {
            Ok(workflow) => run_body(workflow, ctx, task.call.input).await,
            Err(e) => Outcome::Exception(e.into()),
        };
        match monitor.state() {
            CompletionState::Faulted(fault) => Outcome::Exception(fault.unwrap_single()),
            _ => outcome,
        }
    };

    debug!(task_id = %task.task_id, outcome = %outcome.kind(), "applying continuation");
    let next = task.continuations.for_outcome(outcome.kind());
    continuation::apply(resources, next, outcome.clone()).await?;
    Ok(outcome)
}

async fn mark_running(resources: &Resources, process: ProcessId) -> Result<(), RuntimeError> {
    match resources.processes.set_running(process).await {
        Ok(()) => Ok(()),
        Err(PrimitiveError::InvalidTransition { from, .. }) if from.is_terminal() => {
            debug!(process_id = %process, status = ?from, "process already terminal, running anyway");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nimbus_core::config::{QueueConfig, RuntimeConfig};
    use nimbus_core::TaskId;
    use nimbus_primitives::{
        MemoryProcessMonitor, ProcessInfo, ProcessMonitor, ProcessRecord, ProcessStatus, ResultCellStore,
    };

    use crate::dependency::BlobDependencyExporter;
    use crate::workflow::WorkflowCall;

    fn registry() -> Arc<WorkflowRegistry> {
        let mut registry = WorkflowRegistry::new();
        registry
            .register_typed("answer", |_ctx, ()| async move { Ok(42i32) })
            .register_typed("throw", |_ctx, ()| async move {
                Err::<i32, _>(TaskFault::failed("demo", "thrown").into())
            })
            .register_typed("panic", |_ctx, ()| async move {
                if true {
                    panic!("body panicked");
                }
                Ok(0i32)
            })
            .register_typed("fault_monitor", |ctx, ()| async move {
                ctx.monitor().trigger_fault(TaskFault::failed("demo", "signalled"));
                Ok(1i32)
            });
        Arc::new(registry)
    }

    fn state() -> RuntimeState {
        RuntimeState::in_memory(&QueueConfig::default(), &RuntimeConfig::default())
    }

    async fn run(state: &RuntimeState, registry: &Arc<WorkflowRegistry>) -> Outcome {
        let dequeued = state.try_dequeue().await.unwrap().expect("queued task");
        execute_task(
            state,
            registry,
            dequeued.task,
            dequeued.dependencies,
            SlotHandle::detached(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn completed_value_reaches_cell_and_record() {
        let state = state();
        let registry = registry();
        let handle = state
            .start_as_process::<i32>("answer", WorkflowCall::new("answer", &()).unwrap(), vec![])
            .await
            .unwrap();

        let outcome = run(&state, &registry).await;
        assert!(outcome.is_completed());
        assert_eq!(handle.status().await.unwrap(), ProcessStatus::Completed);
        assert_eq!(handle.result().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn thrown_fault_becomes_exception() {
        let state = state();
        let registry = registry();
        let handle = state
            .start_as_process::<i32>("throw", WorkflowCall::new("throw", &()).unwrap(), vec![])
            .await
            .unwrap();

        run(&state, &registry).await;
        assert_eq!(handle.status().await.unwrap(), ProcessStatus::Faulted);
        assert_eq!(
            handle.try_outcome().await.unwrap(),
            Some(Outcome::Exception(TaskFault::failed("demo", "thrown")))
        );
    }

    #[tokio::test]
    async fn panic_is_captured_as_fault() {
        let state = state();
        let registry = registry();
        let handle = state
            .start_as_process::<i32>("panic", WorkflowCall::new("panic", &()).unwrap(), vec![])
            .await
            .unwrap();

        run(&state, &registry).await;
        assert_eq!(handle.status().await.unwrap(), ProcessStatus::Faulted);
        assert_eq!(
            handle.try_outcome().await.unwrap(),
            Some(Outcome::Exception(TaskFault::Panicked("body panicked".into())))
        );
    }

    #[tokio::test]
    async fn body_that_faults_its_monitor_is_recorded_as_fault() {
        let state = state();
        let registry = registry();
        let handle = state
            .start_as_process::<i32>("fault_monitor", WorkflowCall::new("fault_monitor", &()).unwrap(), vec![])
            .await
            .unwrap();

        let outcome = run(&state, &registry).await;
        let fault = Outcome::Exception(TaskFault::failed("demo", "signalled"));
        assert_eq!(outcome, fault);
        assert_eq!(handle.status().await.unwrap(), ProcessStatus::Faulted);
        assert_eq!(handle.try_outcome().await.unwrap(), Some(fault));
        assert!(state.try_dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn start_as_cell_delivers_value_and_fault() {
        let state = state();
        let registry = registry();
        let resources = state.resources();
        let cts = resources.cancellation_source(resources.cancellation.create(None).await.unwrap());
        let process = ProcessId::new();

        let answer = state
            .start_as_cell::<i32>(process, WorkflowCall::new("answer", &()).unwrap(), vec![], &cts)
            .await
            .unwrap();
        assert_eq!(answer.try_outcome().await.unwrap(), None);
        assert!(run(&state, &registry).await.is_completed());
        assert_eq!(answer.result().await.unwrap(), 42);

        let thrown = state
            .start_as_cell::<i32>(process, WorkflowCall::new("throw", &()).unwrap(), vec![], &cts)
            .await
            .unwrap();
        run(&state, &registry).await;
        assert_eq!(
            thrown.outcome().await.unwrap(),
            Outcome::Exception(TaskFault::failed("demo", "thrown"))
        );
        assert!(matches!(thrown.result().await, Err(RuntimeError::Faulted(_))));
    }

    #[tokio::test]
    async fn pre_cancelled_task_is_killed_without_running() {
        let state = state();
        let registry = registry();
        let handle = state
            .start_as_process::<i32>("answer", WorkflowCall::new("answer", &()).unwrap(), vec![])
            .await
            .unwrap();
        handle.cancel().await.unwrap();

        let outcome = run(&state, &registry).await;
        assert!(matches!(outcome, Outcome::Cancelled(_)));
        assert_eq!(handle.status().await.unwrap(), ProcessStatus::Killed);
        assert!(handle.record().await.unwrap().started_at.is_none());
    }

    #[tokio::test]
    async fn unknown_workflow_faults_the_process() {
        let state = state();
        let registry = registry();
        let handle = state
            .start_as_process::<i32>("ghost", WorkflowCall::new("ghost", &()).unwrap(), vec![])
            .await
            .unwrap();

        run(&state, &registry).await;
        assert_eq!(handle.status().await.unwrap(), ProcessStatus::Faulted);
    }

    #[tokio::test]
    async fn continuation_failure_faults_the_monitor() {
        let state = state();
        let registry = registry();
        // a process that was never recorded: moving it to a terminal status fails
        let process = ProcessId::new();
        let cell = state.resources().cells.create_cell(process).await.unwrap();
        let task = Task {
            task_id: TaskId::new(),
            process_id: process,
            result_type: "i32".into(),
            call: WorkflowCall::new("answer", &()).unwrap(),
            cancellation: state.resources().cancellation.create(None).await.unwrap(),
            continuations: crate::task::Continuations::process(process, cell),
            process_root: false,
        };

        let err = execute_task(&state, &registry, task, vec![], SlotHandle::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Faulted(TaskFault::Failed { ref kind, .. }) if kind == "primitive"));
    }

    /// Process monitor that checks the result cell is already written
    /// whenever a terminal status is recorded.
    struct OrderCheckingMonitor {
        inner: MemoryProcessMonitor,
        cells: Arc<dyn ResultCellStore>,
    }

    impl OrderCheckingMonitor {
        async fn assert_cell_written(&self, process: ProcessId) -> Result<(), PrimitiveError> {
            let record = self.inner.get_record(process).await?;
            let value = self.cells.try_get(record.info.cell).await?;
            assert!(value.is_some(), "terminal status recorded before the result cell was written");
            Ok(())
        }
    }

    #[async_trait]
    impl ProcessMonitor for OrderCheckingMonitor {
        async fn create_record(&self, info: ProcessInfo) -> Result<ProcessRecord, PrimitiveError> {
            self.inner.create_record(info).await
        }

        async fn get_record(&self, process: ProcessId) -> Result<ProcessRecord, PrimitiveError> {
            self.inner.get_record(process).await
        }

        async fn list_records(&self) -> Result<Vec<ProcessRecord>, PrimitiveError> {
            self.inner.list_records().await
        }

        async fn set_running(&self, process: ProcessId) -> Result<(), PrimitiveError> {
            self.inner.set_running(process).await
        }

        async fn set_completed(&self, process: ProcessId) -> Result<(), PrimitiveError> {
            self.assert_cell_written(process).await?;
            self.inner.set_completed(process).await
        }

        async fn set_faulted(&self, process: ProcessId) -> Result<(), PrimitiveError> {
            self.assert_cell_written(process).await?;
            self.inner.set_faulted(process).await
        }

        async fn set_killed(&self, process: ProcessId) -> Result<(), PrimitiveError> {
            self.assert_cell_written(process).await?;
            self.inner.set_killed(process).await
        }
    }

    #[tokio::test]
    async fn record_is_terminal_only_after_cell_is_written() {
        let mut resources = Resources::in_memory();
        resources.processes = Arc::new(OrderCheckingMonitor {
            inner: MemoryProcessMonitor::new(),
            cells: resources.cells.clone(),
        });
        let blobs = Arc::new(nimbus_queue::MemoryBlobStore::new());
        let state = RuntimeState::new(
            Arc::new(nimbus_queue::MemoryQueue::new(&QueueConfig::default(), blobs.clone())),
            Arc::new(BlobDependencyExporter::new(blobs)),
            resources,
            RuntimeConfig::default(),
        );
        let registry = registry();

        for name in ["answer", "throw"] {
            let handle = state
                .start_as_process::<i32>(name, WorkflowCall::new(name, &()).unwrap(), vec![])
                .await
                .unwrap();
            let outcome = run(&state, &registry).await;
            assert!(handle.status().await.unwrap().is_terminal(), "{name}: {outcome:?}");
        }
    }
}
