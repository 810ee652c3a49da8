//! Process-wide runtime handle: the queue, the dependency exporter and the
//! distributed primitives every worker and client of one runtime shares.

use std::sync::Arc;

use tracing::{debug, warn};

use nimbus_core::config::{QueueConfig, RuntimeConfig};
use nimbus_core::{DependencyId, Payload, ProcessId, TaskId};
use nimbus_primitives::{CancellationTokenSource, ProcessInfo, Resources, ResultCell};
use nimbus_queue::{MemoryBlobStore, MemoryQueue, QueueItem, QueueMessage, TaskQueue};

use crate::dependency::{BlobDependencyExporter, DependencyExporter};
use crate::error::RuntimeError;
use crate::handle::{CellHandle, ProcessHandle};
use crate::task::{Continuations, Task, TaskSpec};
use crate::workflow::WorkflowCall;

/// A task taken off the queue, ready to run.
#[derive(Debug)]
pub struct DequeuedTask {
    /// Lease on the queue message; ack or nack through its receipt handle.
    pub message: QueueMessage,
    pub task: Task,
    pub process_id: ProcessId,
    pub dependencies: Vec<DependencyId>,
}

#[derive(Clone)]
pub struct RuntimeState {
    queue: Arc<dyn TaskQueue>,
    dependencies: Arc<dyn DependencyExporter>,
    resources: Resources,
    config: RuntimeConfig,
}

impl RuntimeState {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        dependencies: Arc<dyn DependencyExporter>,
        resources: Resources,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            queue,
            dependencies,
            resources,
            config,
        }
    }

    /// A runtime living entirely in this process.
    pub fn in_memory(queue: &QueueConfig, runtime: &RuntimeConfig) -> Self {
        let blobs = Arc::new(MemoryBlobStore::new());
        Self::new(
            Arc::new(MemoryQueue::new(queue, blobs.clone())),
            Arc::new(BlobDependencyExporter::new(blobs)),
            Resources::in_memory(),
            runtime.clone(),
        )
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    pub fn dependencies(&self) -> &Arc<dyn DependencyExporter> {
        &self.dependencies
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    fn queue_item(spec: TaskSpec) -> Result<(TaskId, QueueItem), RuntimeError> {
        let (task, dependencies) = Task::from_spec(spec);
        let item = QueueItem {
            process_id: task.process_id,
            dependencies,
            body: Payload::encode(&task)?.into_bytes(),
        };
        Ok((task.task_id, item))
    }

    /// Serialize one task and push it onto the queue.
    pub async fn enqueue(&self, spec: TaskSpec) -> Result<TaskId, RuntimeError> {
        let (task_id, item) = Self::queue_item(spec)?;
        debug!(task_id = %task_id, process_id = %item.process_id, "enqueueing task");
        self.queue.enqueue(item).await?;
        Ok(task_id)
    }

    /// Serialize several tasks and push them as one batch write.
    pub async fn enqueue_batch(&self, specs: Vec<TaskSpec>) -> Result<Vec<TaskId>, RuntimeError> {
        let mut ids = Vec::with_capacity(specs.len());
        let mut items = Vec::with_capacity(specs.len());
        for spec in specs {
            let (task_id, item) = Self::queue_item(spec)?;
            ids.push(task_id);
            items.push(item);
        }
        debug!(count = items.len(), "enqueueing task batch");
        self.queue.enqueue_batch(items).await?;
        Ok(ids)
    }

    /// Take one task off the queue without waiting.
    ///
    /// A message whose body is not a task is dropped from the queue. One
    /// whose payload or dependencies cannot be fetched yet is handed back.
    /// Either way the error is returned.
    pub async fn try_dequeue(&self) -> Result<Option<DequeuedTask>, RuntimeError> {
        let Some(message) = self.queue.try_dequeue().await? else {
            return Ok(None);
        };

        match self.decode(&message).await {
            Ok(task) => Ok(Some(DequeuedTask {
                process_id: message.process_id,
                dependencies: message.dependencies.clone(),
                task,
                message,
            })),
            Err(e @ RuntimeError::Codec(_)) => {
                warn!(message_id = %message.id, error = %e, "dropping message that is not a task");
                if let Err(ack) = self.queue.ack(&message.receipt_handle).await {
                    warn!(message_id = %message.id, error = %ack, "failed to drop undecodable message");
                }
                Err(e)
            }
            Err(e) => {
                if let Err(nack) = self.queue.nack(&message.receipt_handle).await {
                    warn!(message_id = %message.id, error = %nack, "failed to release message");
                }
                Err(e)
            }
        }
    }

    async fn decode(&self, message: &QueueMessage) -> Result<Task, RuntimeError> {
        let body = message.payload().await?;
        self.dependencies.load_dependencies(&message.dependencies).await?;
        Ok(Payload::from_bytes(body).decode()?)
    }

    /// Submit a workflow whose outcome is written to a fresh result cell.
    /// Returns as soon as the task is enqueued.
    pub async fn start_as_cell<T: serde::de::DeserializeOwned>(
        &self,
        process_id: ProcessId,
        call: WorkflowCall,
        dependencies: Vec<DependencyId>,
        cancellation: &CancellationTokenSource,
    ) -> Result<CellHandle<T>, RuntimeError> {
        let cell = self.resources.cells.create_cell(process_id).await?;
        self.enqueue(TaskSpec {
            process_id,
            dependencies,
            cancellation: cancellation.id(),
            continuations: Continuations::cell(cell),
            call,
            result_type: std::any::type_name::<T>().to_string(),
            process_root: false,
        })
        .await?;
        Ok(CellHandle::new(
            ResultCell::new(cell, self.resources.cells.clone()),
            self.config.cell_poll_interval,
        ))
    }

    /// Submit a workflow as a new process with its own record, result cell
    /// and cancellation source.
    pub async fn start_as_process<T: serde::de::DeserializeOwned>(
        &self,
        name: impl Into<String>,
        call: WorkflowCall,
        dependencies: Vec<DependencyId>,
    ) -> Result<ProcessHandle<T>, RuntimeError> {
        let process_id = ProcessId::new();
        let cancellation = CancellationTokenSource::create(self.resources.cancellation.clone()).await?;
        let cell = self.resources.cells.create_cell(process_id).await?;
        let result_type = std::any::type_name::<T>().to_string();

        let info = ProcessInfo {
            process_id,
            name: name.into(),
            result_type: result_type.clone(),
            cancellation: cancellation.id(),
            cell,
        };
        self.resources.processes.create_record(info.clone()).await?;

        self.enqueue(TaskSpec {
            process_id,
            dependencies,
            cancellation: cancellation.id(),
            continuations: Continuations::process(process_id, cell),
            call,
            result_type,
            process_root: true,
        })
        .await?;

        Ok(ProcessHandle::new(
            info,
            ResultCell::new(cell, self.resources.cells.clone()),
            cancellation,
            self.resources.processes.clone(),
            self.config.cell_poll_interval,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_primitives::ProcessStatus;

    fn state() -> RuntimeState {
        RuntimeState::in_memory(&QueueConfig::default(), &RuntimeConfig::default())
    }

    async fn spec(state: &RuntimeState, deps: Vec<DependencyId>) -> TaskSpec {
        let cts = CancellationTokenSource::create(state.resources().cancellation.clone())
            .await
            .unwrap();
        TaskSpec {
            process_id: ProcessId::new(),
            dependencies: deps,
            cancellation: cts.id(),
            continuations: Continuations::cell(nimbus_core::CellId::new()),
            call: WorkflowCall::new("sum", &vec![1, 2, 3]).unwrap(),
            result_type: "i32".into(),
            process_root: false,
        }
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_round_trips() {
        let state = state();
        let dep = DependencyId::new("geometry", "2.1");
        state.dependencies().publish(&dep, vec![0xAB; 16]).await.unwrap();

        let spec = spec(&state, vec![dep.clone()]).await;
        let process_id = spec.process_id;
        let call = spec.call.clone();
        let task_id = state.enqueue(spec).await.unwrap();

        let dequeued = state.try_dequeue().await.unwrap().expect("task");
        assert_eq!(dequeued.process_id, process_id);
        assert_eq!(dequeued.dependencies, vec![dep.clone()]);
        assert_eq!(dequeued.task.task_id, task_id);
        assert_eq!(dequeued.task.call, call);
        assert_eq!(
            dequeued.task.call.input.decode::<Vec<i32>>().unwrap(),
            vec![1, 2, 3]
        );
        assert!(state.dependencies().is_loaded(&dep).await.unwrap());
        assert!(state.try_dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn batch_enqueue_gives_distinct_ids() {
        let state = state();
        let specs = vec![spec(&state, vec![]).await, spec(&state, vec![]).await];
        let ids = state.enqueue_batch(specs).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(
            state.queue().health_check().await.unwrap().approximate_message_count,
            Some(2)
        );
    }

    #[tokio::test]
    async fn missing_dependency_releases_the_message() {
        let state = state();
        let spec = spec(&state, vec![DependencyId::new("absent", "0.0")]).await;
        state.enqueue(spec).await.unwrap();

        let err = state.try_dequeue().await.unwrap_err();
        assert!(matches!(err, RuntimeError::MissingDependency(_)));
        let health = state.queue().health_check().await.unwrap();
        assert_eq!(health.approximate_message_count, Some(1));
        assert_eq!(health.in_flight, Some(0));
    }

    #[tokio::test]
    async fn undecodable_message_is_dropped() {
        let state = state();
        state
            .queue()
            .enqueue(QueueItem {
                process_id: ProcessId::new(),
                dependencies: vec![],
                body: b"not a task".to_vec(),
            })
            .await
            .unwrap();

        let err = state.try_dequeue().await.unwrap_err();
        assert_eq!(err.kind(), "codec");
        let health = state.queue().health_check().await.unwrap();
        assert_eq!(health.approximate_message_count, Some(0));
        assert_eq!(health.in_flight, Some(0));
    }

    #[tokio::test]
    async fn start_as_process_creates_record_before_enqueue() {
        let state = state();
        let handle = state
            .start_as_process::<i32>("answer", WorkflowCall::new("answer", &()).unwrap(), vec![])
            .await
            .unwrap();

        let record = handle.record().await.unwrap();
        assert_eq!(record.status, ProcessStatus::Created);
        assert_eq!(record.info.name, "answer");
        assert_eq!(record.info.result_type, "i32");

        let dequeued = state.try_dequeue().await.unwrap().unwrap();
        assert_eq!(dequeued.process_id, handle.id());
        assert!(dequeued.task.process_root);
        assert_eq!(
            dequeued.task.continuations,
            Continuations::process(handle.id(), record.info.cell)
        );
    }
}
