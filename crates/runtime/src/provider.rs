//! Scheduling provider: turns Parallel, Choice and StartChild requests into
//! queued tasks or in-process execution depending on the scheduling context.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, warn};

use nimbus_core::{AggregatorId, CellId, CounterId, DependencyId, Outcome, Payload, ProcessId, TaskFault, TaskId};
use nimbus_primitives::{CancellationTokenSource, PrimitiveError, Resources, ResultCell, WorkerRef};

use crate::context::ExecutionContext;
use crate::continuation::derive_choice_failure;
use crate::error::RuntimeError;
use crate::execution::run_body;
use crate::handle::outcome_value;
use crate::monitor::CompletionMonitor;
use crate::slot::SlotHandle;
use crate::state::RuntimeState;
use crate::task::{Continuations, TaskSpec};
use crate::workflow::{WorkflowCall, WorkflowRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingContext {
    /// Children go through the queue and run on any worker.
    #[default]
    Distributed,
    /// Children run concurrently inside this process.
    ThreadParallel,
    /// Children run one after another, in order, inside this process.
    Sequential,
}

/// Handle to a child started with [`RuntimeProvider::schedule_start_child`].
#[derive(Debug)]
pub enum ChildHandle {
    Remote {
        cell: ResultCell,
        poll: Duration,
        slot: SlotHandle,
    },
    Local(JoinHandle<Outcome>),
    Ready(Outcome),
}

impl ChildHandle {
    /// Wait for the child's outcome.
    ///
    /// A remote child's cell is disposed once read.
    pub async fn outcome(self) -> Result<Outcome, RuntimeError> {
        match self {
            Self::Remote { cell, poll, slot } => {
                let outcome = {
                    let _suspended = slot.suspend();
                    cell.value(poll).await?
                };
                if let Err(e) = cell.dispose().await {
                    warn!(cell_id = %cell.id(), error = %e, "failed to dispose child cell");
                }
                Ok(outcome)
            }
            Self::Local(handle) => handle.await.map_err(join_fault),
            Self::Ready(outcome) => Ok(outcome),
        }
    }

    pub async fn join(self) -> Result<Payload, RuntimeError> {
        outcome_value(self.outcome().await?)
    }

    pub async fn join_as<T: serde::de::DeserializeOwned>(self) -> Result<T, RuntimeError> {
        Ok(self.join().await?.decode()?)
    }
}

fn join_fault(e: JoinError) -> RuntimeError {
    RuntimeError::Faulted(TaskFault::Panicked(e.to_string()))
}

/// Next finished local child. A child that died outside its body cancels
/// the rest before the error is returned.
async fn next_joined<T: 'static>(
    set: &mut JoinSet<T>,
    children: &CancellationTokenSource,
) -> Result<Option<T>, RuntimeError> {
    match set.join_next().await {
        None => Ok(None),
        Some(Ok(value)) => Ok(Some(value)),
        Some(Err(e)) => {
            children.cancel().await?;
            set.detach_all();
            Err(join_fault(e))
        }
    }
}

/// Local children still running after this read the source as cancelled.
async fn dispose_source(source: &CancellationTokenSource) {
    if let Err(e) = source.dispose().await {
        warn!(cancellation_id = %source.id(), error = %e, "failed to dispose cancellation source");
    }
}

/// Primitives one distributed Parallel or Choice allocates for its children.
///
/// The parent disposes them once it has a result. Children that report
/// afterwards find them gone and their outcome is dropped.
struct FanOutScope {
    children: CancellationTokenSource,
    cell: CellId,
    slots: AggregatorId,
    remaining: CounterId,
}

impl FanOutScope {
    async fn open(
        resources: &Resources,
        parent: &CancellationTokenSource,
        process: ProcessId,
        count: usize,
    ) -> Result<Self, RuntimeError> {
        Ok(Self {
            children: parent.create_linked().await?,
            cell: resources.cells.create_cell(process).await?,
            slots: resources.aggregators.create(count).await?,
            remaining: resources.counters.create_counter(count as i64).await?,
        })
    }

    async fn dispose(&self, resources: &Resources) {
        let disposed: Result<(), PrimitiveError> = async {
            resources.cells.dispose(self.cell).await?;
            resources.aggregators.dispose(self.slots).await?;
            resources.counters.dispose(self.remaining).await?;
            self.children.dispose().await
        }
        .await;
        match disposed {
            Ok(()) => debug!(cancellation_id = %self.children.id(), "fan-out primitives disposed"),
            Err(e) => warn!(error = %e, "failed to dispose fan-out primitives"),
        }
    }
}

/// Scheduling provider bound to one process and cancellation source.
///
/// A provider never changes after construction;
/// [`with_scheduling_context`](Self::with_scheduling_context) returns a new one.
#[derive(Clone)]
pub struct RuntimeProvider {
    state: RuntimeState,
    registry: Arc<WorkflowRegistry>,
    process_id: ProcessId,
    dependencies: Vec<DependencyId>,
    cancellation: CancellationTokenSource,
    context: SchedulingContext,
    slot: SlotHandle,
}

impl RuntimeProvider {
    pub fn new(
        state: RuntimeState,
        registry: Arc<WorkflowRegistry>,
        process_id: ProcessId,
        dependencies: Vec<DependencyId>,
        cancellation: CancellationTokenSource,
    ) -> Self {
        Self {
            state,
            registry,
            process_id,
            dependencies,
            cancellation,
            context: SchedulingContext::Distributed,
            slot: SlotHandle::detached(),
        }
    }

    /// Give the running task's worker slot back while waiting on queued children.
    pub fn with_slot(self, slot: SlotHandle) -> Self {
        Self { slot, ..self }
    }

    pub fn with_scheduling_context(&self, context: SchedulingContext) -> Self {
        Self {
            context,
            ..self.clone()
        }
    }

    fn with_cancellation(&self, cancellation: CancellationTokenSource) -> Self {
        Self {
            cancellation,
            ..self.clone()
        }
    }

    pub fn scheduling_context(&self) -> SchedulingContext {
        self.context
    }

    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    pub fn cancellation(&self) -> &CancellationTokenSource {
        &self.cancellation
    }

    pub fn state(&self) -> &RuntimeState {
        &self.state
    }

    fn poll_interval(&self) -> Duration {
        self.state.config().cell_poll_interval
    }

    fn child_spec(&self, call: WorkflowCall, cancellation: &CancellationTokenSource, continuations: Continuations) -> TaskSpec {
        TaskSpec {
            process_id: self.process_id,
            dependencies: self.dependencies.clone(),
            cancellation: cancellation.id(),
            continuations,
            call,
            result_type: std::any::type_name::<Payload>().to_string(),
            process_root: false,
        }
    }

    /// Run every computation and return their values in submission order.
    /// The first fault or cancellation observed ends the whole operation.
    pub async fn schedule_parallel(&self, calls: Vec<WorkflowCall>) -> Result<Vec<Payload>, RuntimeError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        match self.context {
            SchedulingContext::Distributed => self.parallel_distributed(calls).await,
            SchedulingContext::ThreadParallel => self.parallel_threaded(calls).await,
            SchedulingContext::Sequential => self.parallel_sequential(calls).await,
        }
    }

    async fn parallel_distributed(&self, calls: Vec<WorkflowCall>) -> Result<Vec<Payload>, RuntimeError> {
        let resources = self.state.resources();
        let scope = FanOutScope::open(resources, &self.cancellation, self.process_id, calls.len()).await?;
        let result = self.await_parallel(&scope, calls).await;
        scope.dispose(resources).await;
        result
    }

    async fn await_parallel(&self, scope: &FanOutScope, calls: Vec<WorkflowCall>) -> Result<Vec<Payload>, RuntimeError> {
        let resources = self.state.resources();
        let count = calls.len();
        let specs = calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| {
                let continuations =
                    Continuations::parallel(scope.slots, scope.remaining, index, scope.cell, scope.children.id());
                self.child_spec(call, &scope.children, continuations)
            })
            .collect();
        self.state.enqueue_batch(specs).await?;
        debug!(process_id = %self.process_id, count, "parallel children enqueued");

        let _suspended = self.slot.suspend();
        loop {
            if let Some(failed) = resources.cells.try_get(scope.cell).await? {
                outcome_value(failed)?;
                return Err(RuntimeError::InvalidOperation("parallel fault cell held a value".into()));
            }
            if resources.counters.value(scope.remaining).await? <= 0 {
                if let Some(values) = resources.aggregators.values(scope.slots).await? {
                    return Ok(values);
                }
            }
            if self.cancellation.is_cancelled().await? {
                scope.children.cancel().await?;
                return Err(RuntimeError::Cancelled("parallel cancelled by parent".into()));
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    async fn parallel_threaded(&self, calls: Vec<WorkflowCall>) -> Result<Vec<Payload>, RuntimeError> {
        let children = self.cancellation.create_linked().await?;
        let result = self.join_parallel(&children, calls).await;
        dispose_source(&children).await;
        result
    }

    async fn join_parallel(
        &self,
        children: &CancellationTokenSource,
        calls: Vec<WorkflowCall>,
    ) -> Result<Vec<Payload>, RuntimeError> {
        let provider = self.with_cancellation(children.clone());
        let mut results: Vec<Option<Payload>> = vec![None; calls.len()];

        let mut set = JoinSet::new();
        for (index, call) in calls.into_iter().enumerate() {
            let provider = provider.clone();
            set.spawn(async move { (index, provider.run_local(call).await) });
        }

        while let Some((index, outcome)) = next_joined(&mut set, children).await? {
            match outcome_value(outcome) {
                Ok(value) => results[index] = Some(value),
                Err(e) => {
                    children.cancel().await?;
                    set.detach_all();
                    return Err(e);
                }
            }
        }

        results
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| RuntimeError::InvalidOperation("parallel finished with empty slots".into()))
    }

    async fn parallel_sequential(&self, calls: Vec<WorkflowCall>) -> Result<Vec<Payload>, RuntimeError> {
        let mut values = Vec::with_capacity(calls.len());
        for call in calls {
            values.push(outcome_value(self.run_local(call).await)?);
        }
        Ok(values)
    }

    /// Return the value of the first computation to succeed and cancel the
    /// rest. Fails with the derived outcome if none succeeds.
    pub async fn schedule_choice(&self, calls: Vec<WorkflowCall>) -> Result<Payload, RuntimeError> {
        if calls.is_empty() {
            return Err(RuntimeError::InvalidArgument("choice needs at least one computation".into()));
        }
        match self.context {
            SchedulingContext::Distributed => self.choice_distributed(calls).await,
            SchedulingContext::ThreadParallel => self.choice_threaded(calls).await,
            SchedulingContext::Sequential => self.choice_sequential(calls).await,
        }
    }

    async fn choice_distributed(&self, calls: Vec<WorkflowCall>) -> Result<Payload, RuntimeError> {
        let resources = self.state.resources();
        let scope = FanOutScope::open(resources, &self.cancellation, self.process_id, calls.len()).await?;
        let result = self.await_choice(&scope, calls).await;
        scope.dispose(resources).await;
        result
    }

    async fn await_choice(&self, scope: &FanOutScope, calls: Vec<WorkflowCall>) -> Result<Payload, RuntimeError> {
        let resources = self.state.resources();
        let count = calls.len();
        let specs = calls
            .into_iter()
            .enumerate()
            .map(|(index, call)| {
                let continuations =
                    Continuations::choice(scope.cell, scope.children.id(), scope.slots, scope.remaining, index);
                self.child_spec(call, &scope.children, continuations)
            })
            .collect();
        self.state.enqueue_batch(specs).await?;
        debug!(process_id = %self.process_id, count, "choice children enqueued");

        let _suspended = self.slot.suspend();
        loop {
            if let Some(outcome) = resources.cells.try_get(scope.cell).await? {
                return outcome_value(outcome);
            }
            if self.cancellation.is_cancelled().await? {
                scope.children.cancel().await?;
                return Err(RuntimeError::Cancelled("choice cancelled by parent".into()));
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }

    async fn choice_threaded(&self, calls: Vec<WorkflowCall>) -> Result<Payload, RuntimeError> {
        let children = self.cancellation.create_linked().await?;
        let result = self.join_choice(&children, calls).await;
        dispose_source(&children).await;
        result
    }

    async fn join_choice(&self, children: &CancellationTokenSource, calls: Vec<WorkflowCall>) -> Result<Payload, RuntimeError> {
        let provider = self.with_cancellation(children.clone());
        let mut failures = Vec::with_capacity(calls.len());

        let mut set = JoinSet::new();
        for call in calls {
            let provider = provider.clone();
            set.spawn(async move { provider.run_local(call).await });
        }

        while let Some(joined) = next_joined(&mut set, children).await? {
            match joined {
                Outcome::Completed(value) => {
                    children.cancel().await?;
                    set.detach_all();
                    return Ok(value);
                }
                failed => failures.push(failed),
            }
        }
        outcome_value(derive_choice_failure(failures))
    }

    async fn choice_sequential(&self, calls: Vec<WorkflowCall>) -> Result<Payload, RuntimeError> {
        let mut failures = Vec::with_capacity(calls.len());
        for call in calls {
            match self.run_local(call).await {
                Outcome::Completed(value) => return Ok(value),
                failed => failures.push(failed),
            }
        }
        outcome_value(derive_choice_failure(failures))
    }

    /// Start one child and return a handle that waits for its outcome.
    pub async fn schedule_start_child(&self, call: WorkflowCall) -> Result<ChildHandle, RuntimeError> {
        match self.context {
            SchedulingContext::Distributed => {
                let cells = &self.state.resources().cells;
                let cell = cells.create_cell(self.process_id).await?;
                let spec = self.child_spec(call, &self.cancellation, Continuations::cell(cell));
                self.state.enqueue(spec).await?;
                Ok(ChildHandle::Remote {
                    cell: ResultCell::new(cell, cells.clone()),
                    poll: self.poll_interval(),
                    slot: self.slot.clone(),
                })
            }
            SchedulingContext::ThreadParallel => {
                let provider = self.clone();
                Ok(ChildHandle::Local(tokio::spawn(async move {
                    provider.run_local(call).await
                })))
            }
            SchedulingContext::Sequential => Ok(ChildHandle::Ready(self.run_local(call).await)),
        }
    }

    /// Workers currently registered with the runtime.
    pub async fn available_workers(&self) -> Result<Vec<WorkerRef>, RuntimeError> {
        Ok(self.state.resources().workers.get_all_workers().await?)
    }

    /// Run a computation in this process with its own execution context.
    async fn run_local(&self, call: WorkflowCall) -> Outcome {
        match self.cancellation.is_cancelled().await {
            Ok(true) => return Outcome::Cancelled("cancellation requested".into()),
            Ok(false) => {}
            Err(e) => return Outcome::Exception(RuntimeError::from(e).into()),
        }
        let workflow = match self.registry.resolve(&call) {
            Ok(workflow) => workflow,
            Err(e) => return Outcome::Exception(e.into()),
        };
        let ctx = ExecutionContext::new(self.clone(), CompletionMonitor::new(), TaskId::new());
        run_body(workflow, ctx, call.input).await
    }
}

impl std::fmt::Debug for RuntimeProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeProvider")
            .field("process_id", &self.process_id)
            .field("context", &self.context)
            .field("cancellation", &self.cancellation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::config::{QueueConfig, RuntimeConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::execution::execute_task;
    use crate::slot::TaskSlot;
    use crate::task::Continuation;

    fn registry() -> WorkflowRegistry {
        let mut registry = WorkflowRegistry::new();
        registry
            .register_typed("delayed", |_ctx, (value, ms): (i32, u64)| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(value)
            })
            .register_typed("fail", |_ctx, message: String| async move {
                Err::<i32, _>(TaskFault::failed("test", message).into())
            })
            .register_typed("cancelled", |_ctx, ()| async move {
                Err::<i32, _>(RuntimeError::Cancelled("gave up".into()))
            });
        registry
    }

    async fn provider_with(registry: WorkflowRegistry, context: SchedulingContext) -> RuntimeProvider {
        let runtime = RuntimeConfig {
            cell_poll_interval: Duration::from_millis(5),
        };
        let state = RuntimeState::in_memory(&QueueConfig::default(), &runtime);
        let cts = CancellationTokenSource::create(state.resources().cancellation.clone())
            .await
            .unwrap();
        RuntimeProvider::new(state, Arc::new(registry), ProcessId::new(), vec![], cts)
            .with_scheduling_context(context)
    }

    fn delayed(value: i32, ms: u64) -> WorkflowCall {
        WorkflowCall::new("delayed", &(value, ms)).unwrap()
    }

    fn decode_all(values: Vec<Payload>) -> Vec<i32> {
        values.iter().map(|v| v.decode().unwrap()).collect()
    }

    #[tokio::test]
    async fn with_scheduling_context_leaves_original_untouched() {
        let base = provider_with(registry(), SchedulingContext::Distributed).await;
        let local = base.with_scheduling_context(SchedulingContext::Sequential);
        assert_eq!(base.scheduling_context(), SchedulingContext::Distributed);
        assert_eq!(local.scheduling_context(), SchedulingContext::Sequential);
        assert_eq!(local.process_id(), base.process_id());
    }

    #[tokio::test]
    async fn threaded_parallel_keeps_submission_order() {
        let provider = provider_with(registry(), SchedulingContext::ThreadParallel).await;
        let values = provider
            .schedule_parallel(vec![delayed(1, 40), delayed(2, 5), delayed(3, 20)])
            .await
            .unwrap();
        assert_eq!(decode_all(values), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn sequential_parallel_runs_in_order() {
        let order = Arc::new(AtomicUsize::new(0));
        let mut registry = WorkflowRegistry::new();
        let seen = order.clone();
        registry.register_typed("stamp", move |_ctx, expected: usize| {
            let seen = seen.clone();
            async move {
                let position = seen.fetch_add(1, Ordering::SeqCst);
                assert_eq!(position, expected);
                Ok(position)
            }
        });
        let provider = provider_with(registry, SchedulingContext::Sequential).await;
        let calls = (0..4usize).map(|i| WorkflowCall::new("stamp", &i).unwrap()).collect();
        let values: Vec<usize> = provider
            .schedule_parallel(calls)
            .await
            .unwrap()
            .iter()
            .map(|v| v.decode().unwrap())
            .collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn parallel_fault_wins_and_cancels_siblings() {
        let provider = provider_with(registry(), SchedulingContext::ThreadParallel).await;
        let err = provider
            .schedule_parallel(vec![
                delayed(1, 200),
                WorkflowCall::new("fail", &"boom".to_string()).unwrap(),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Faulted(TaskFault::Failed { ref message, .. }) if message == "boom"));
        assert!(!provider.cancellation().is_cancelled().await.unwrap());
    }

    #[tokio::test]
    async fn empty_parallel_is_empty() {
        let provider = provider_with(registry(), SchedulingContext::Distributed).await;
        assert!(provider.schedule_parallel(vec![]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_choice_is_rejected() {
        let provider = provider_with(registry(), SchedulingContext::ThreadParallel).await;
        assert!(matches!(
            provider.schedule_choice(vec![]).await,
            Err(RuntimeError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn threaded_choice_returns_first_success() {
        let provider = provider_with(registry(), SchedulingContext::ThreadParallel).await;
        let value = provider
            .schedule_choice(vec![
                delayed(1, 300),
                WorkflowCall::new("fail", &"no".to_string()).unwrap(),
                delayed(2, 10),
            ])
            .await
            .unwrap();
        assert_eq!(value.decode::<i32>().unwrap(), 2);
    }

    #[tokio::test]
    async fn choice_without_success_derives_failure() {
        for context in [SchedulingContext::ThreadParallel, SchedulingContext::Sequential] {
            let provider = provider_with(registry(), context).await;
            let err = provider
                .schedule_choice(vec![
                    WorkflowCall::new("cancelled", &()).unwrap(),
                    WorkflowCall::new("fail", &"only fault".to_string()).unwrap(),
                ])
                .await
                .unwrap_err();
            assert!(
                matches!(err, RuntimeError::Faulted(TaskFault::Failed { ref message, .. }) if message == "only fault"),
                "{context:?}: {err}"
            );

            let all_cancelled = provider
                .schedule_choice(vec![WorkflowCall::new("cancelled", &()).unwrap()])
                .await
                .unwrap_err();
            assert!(matches!(all_cancelled, RuntimeError::Cancelled(_)));
        }
    }

    #[tokio::test]
    async fn start_child_modes_yield_the_child_value() {
        for context in [SchedulingContext::ThreadParallel, SchedulingContext::Sequential] {
            let provider = provider_with(registry(), context).await;
            let child = provider.schedule_start_child(delayed(7, 5)).await.unwrap();
            assert_eq!(child.join_as::<i32>().await.unwrap(), 7);
        }
    }

    #[tokio::test]
    async fn distributed_start_child_enqueues_a_cell_task() {
        let provider = provider_with(registry(), SchedulingContext::Distributed).await;
        let child = provider.schedule_start_child(delayed(7, 0)).await.unwrap();
        assert!(matches!(child, ChildHandle::Remote { .. }));

        let dequeued = provider.state().try_dequeue().await.unwrap().unwrap();
        assert_eq!(dequeued.process_id, provider.process_id());
        assert!(matches!(
            dequeued.task.continuations.on_success,
            crate::task::Continuation::WriteCell { .. }
        ));
    }

    /// Dequeue and run `count` queued children.
    async fn run_children(provider: &RuntimeProvider, count: usize) -> Vec<crate::task::Task> {
        let mut tasks = Vec::new();
        while tasks.len() < count {
            let Some(dequeued) = provider.state().try_dequeue().await.unwrap() else {
                tokio::time::sleep(Duration::from_millis(2)).await;
                continue;
            };
            tasks.push(dequeued.task.clone());
            execute_task(
                provider.state(),
                &provider.registry,
                dequeued.task,
                dequeued.dependencies,
                SlotHandle::detached(),
            )
            .await
            .unwrap();
        }
        tasks
    }

    #[tokio::test]
    async fn distributed_parallel_disposes_its_primitives() {
        let provider = provider_with(registry(), SchedulingContext::Distributed).await;
        let parent = provider.clone();
        let waiting = tokio::spawn(async move { parent.schedule_parallel(vec![delayed(1, 0), delayed(2, 0)]).await });

        let children = run_children(&provider, 2).await;
        let values = waiting.await.unwrap().unwrap();
        assert_eq!(decode_all(values), vec![1, 2]);

        let resources = provider.state().resources();
        let Continuation::ParallelSlot {
            aggregator, remaining, ..
        } = &children[0].continuations.on_success
        else {
            panic!("expected a parallel slot continuation");
        };
        assert!(resources.aggregators.values(*aggregator).await.is_err());
        assert!(resources.counters.value(*remaining).await.is_err());
        assert!(resources.cancellation.is_cancelled(children[0].cancellation).await.unwrap());
        assert!(!provider.cancellation().is_cancelled().await.unwrap());
    }

    #[derive(Default)]
    struct CountingSlot(AtomicUsize);

    impl TaskSlot for CountingSlot {
        fn suspend(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn resume(&self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn distributed_wait_suspends_the_slot() {
        let slot = Arc::new(CountingSlot::default());
        let provider = provider_with(registry(), SchedulingContext::Distributed)
            .await
            .with_slot(SlotHandle::new(slot.clone()));
        let parent = provider.clone();
        let waiting = tokio::spawn(async move { parent.schedule_choice(vec![delayed(5, 0)]).await });

        tokio::time::timeout(Duration::from_secs(2), async {
            while slot.0.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("parent suspended its slot");

        run_children(&provider, 1).await;
        assert_eq!(waiting.await.unwrap().unwrap().decode::<i32>().unwrap(), 5);
        assert_eq!(slot.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn lost_local_child_cancels_its_siblings() {
        let provider = provider_with(registry(), SchedulingContext::ThreadParallel).await;
        let children = provider.cancellation().create_linked().await.unwrap();
        let mut set = JoinSet::new();
        set.spawn(async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            1
        });
        set.spawn(async {
            if true {
                panic!("child task lost");
            }
            0
        });

        let err = next_joined(&mut set, &children).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Faulted(TaskFault::Panicked(_))));
        assert!(children.is_cancelled().await.unwrap());
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn unknown_workflow_is_a_fault() {
        let provider = provider_with(registry(), SchedulingContext::Sequential).await;
        let err = provider
            .schedule_parallel(vec![WorkflowCall::new("missing", &()).unwrap()])
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Faulted(TaskFault::Failed { ref kind, .. }) if kind == "unknown_workflow"));
    }

    #[tokio::test]
    async fn cancelled_provider_does_not_start_children() {
        let provider = provider_with(registry(), SchedulingContext::Sequential).await;
        provider.cancellation().cancel().await.unwrap();
        let err = provider.schedule_parallel(vec![delayed(1, 0)]).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Cancelled(_)));
    }
}
