//! The worker loop: admission control, dequeue, dispatch, drain.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn, Instrument};

use nimbus_core::WorkerId;
use nimbus_primitives::WorkerRef;
use nimbus_runtime::{execute_task, DequeuedTask, RuntimeState, SlotHandle, TaskSlot, WorkflowRegistry};

use crate::config::WorkerOptions;
use crate::error::WorkerError;
use crate::metrics::{StatsSampler, TaskCounters, WorkerStats};

/// Pulls tasks off a runtime's queue and runs up to
/// `max_concurrent_tasks` of them at once.
pub struct Worker {
    options: WorkerOptions,
    state: RuntimeState,
    registry: Arc<WorkflowRegistry>,
    counters: Arc<TaskCounters>,
    stats: Arc<RwLock<WorkerStats>>,
}

impl Worker {
    pub fn new(options: WorkerOptions, state: RuntimeState, registry: Arc<WorkflowRegistry>) -> Self {
        Self {
            options,
            state,
            registry,
            counters: Arc::new(TaskCounters::default()),
            stats: Arc::new(RwLock::new(WorkerStats::default())),
        }
    }

    pub fn id(&self) -> &WorkerId {
        &self.options.id
    }

    /// Run the loop on a background task.
    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let id = self.options.id.clone();
        let counters = self.counters.clone();
        let stats = self.stats.clone();
        let join = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            id,
            shutdown_tx,
            join,
            counters,
            stats,
        }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped, then
    /// drain in-flight tasks for at most `shutdown_timeout`.
    ///
    /// Operational faults never end the loop; they are logged and retried
    /// after `fault_backoff`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let span = self.options.span.clone();
        async move {
            info!(max_tasks = self.options.max_concurrent_tasks, "worker starting");
            self.register().await;
            let heartbeat = self.spawn_heartbeat();
            let sampler = StatsSampler::spawn(
                self.counters.clone(),
                self.stats.clone(),
                self.options.stats_interval,
                self.options.span.clone(),
            );

            let mut tasks = JoinSet::new();
            loop {
                if *shutdown.borrow() {
                    break;
                }
                reap(&mut tasks);

                let pause = self.poll_once(&mut tasks).await;
                let stop = tokio::select! {
                    _ = tokio::time::sleep(pause) => false,
                    changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
                };
                if stop {
                    break;
                }
            }

            self.drain(&mut tasks).await;
            heartbeat.abort();
            if let Err(e) = self.state.resources().workers.unregister(&self.options.id).await {
                warn!(error = %e, "failed to unregister worker");
            }
            sampler.shutdown().await;
            info!("worker stopped");
            Ok(())
        }
        .instrument(span)
        .await
    }

    /// One admission check and, capacity permitting, one dequeue. Returns
    /// how long to pause before the next iteration.
    async fn poll_once(&self, tasks: &mut JoinSet<()>) -> Duration {
        let in_flight = self.counters.in_flight();
        if in_flight >= self.options.max_concurrent_tasks {
            debug!(in_flight, "at capacity");
            return self.options.busy_backoff;
        }

        match self.state.try_dequeue().await {
            Ok(Some(dequeued)) => {
                self.dispatch(dequeued, tasks);
                self.options.dispatch_delay
            }
            Ok(None) => self.options.empty_backoff,
            Err(e) => {
                error!(error = %e, kind = e.kind(), "worker loop fault");
                self.options.fault_backoff
            }
        }
    }

    fn dispatch(&self, dequeued: DequeuedTask, tasks: &mut JoinSet<()>) {
        let guard = InFlightGuard::admit(self.counters.clone());
        let slot = SlotHandle::new(Arc::new(WorkerSlot::new(self.counters.clone())));
        let span = tracing::info_span!(
            parent: &self.options.span,
            "task",
            task_id = %dequeued.task.task_id,
            process_id = %dequeued.process_id
        );
        let state = self.state.clone();
        let registry = self.registry.clone();
        let counters = self.counters.clone();

        tasks.spawn(
            async move {
                let _guard = guard;
                run_task(state, registry, counters, slot, dequeued).await;
            }
            .instrument(span),
        );
    }

    async fn register(&self) {
        let me = WorkerRef::new(
            self.options.id.clone(),
            self.options.name.clone(),
            self.options.max_concurrent_tasks,
        );
        if let Err(e) = self.state.resources().workers.register(me).await {
            warn!(error = %e, "failed to register worker");
        }
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let workers = self.state.resources().workers.clone();
        let id = self.options.id.clone();
        let period = self.options.heartbeat_interval;
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = workers.heartbeat(&id).await {
                        warn!(error = %e, "heartbeat failed");
                    }
                }
            }
            .instrument(self.options.span.clone()),
        )
    }

    async fn drain(&self, tasks: &mut JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }
        info!(in_flight = tasks.len(), "draining in-flight tasks");
        let drained = tokio::time::timeout(self.options.shutdown_timeout, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                timeout = ?self.options.shutdown_timeout,
                "shutdown timed out, aborting remaining tasks"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.try_join_next() {
        if let Err(e) = joined {
            error!(error = %e, "task fiber ended abnormally");
        }
    }
}

/// Execute one dequeued task and settle its queue message.
async fn run_task(
    state: RuntimeState,
    registry: Arc<WorkflowRegistry>,
    counters: Arc<TaskCounters>,
    slot: SlotHandle,
    dequeued: DequeuedTask,
) {
    let DequeuedTask {
        message,
        task,
        dependencies,
        ..
    } = dequeued;
    let attempt = message.attempt_count;

    let started = Instant::now();
    let result = execute_task(&state, &registry, task, dependencies, slot).await;
    let elapsed = started.elapsed();
    let elapsed_ms = elapsed.as_millis() as u64;

    match result {
        Ok(outcome) => {
            counters.record(Some(outcome.kind()), elapsed);
            info!(outcome = %outcome.kind(), elapsed_ms, attempt, "task finished");
            if let Err(e) = state.queue().ack(&message.receipt_handle).await {
                warn!(error = %e, "failed to ack task message");
            }
        }
        Err(e) => {
            counters.record(None, elapsed);
            error!(error = %e, kind = e.kind(), elapsed_ms, attempt, "task outcome not recorded");
            if let Err(e) = state.queue().nack(&message.receipt_handle).await {
                warn!(error = %e, "failed to release task message");
            }
        }
    }
}

/// Holds one in-flight slot; releases it when dropped, including when the
/// fiber panics or is aborted.
struct InFlightGuard {
    counters: Arc<TaskCounters>,
}

impl InFlightGuard {
    fn admit(counters: Arc<TaskCounters>) -> Self {
        counters.admit();
        Self { counters }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.counters.release();
    }
}

/// One running task's slot, handed back to the worker while the task waits
/// on children it queued.
struct WorkerSlot {
    counters: Arc<TaskCounters>,
    waits: AtomicUsize,
}

impl WorkerSlot {
    fn new(counters: Arc<TaskCounters>) -> Self {
        Self {
            counters,
            waits: AtomicUsize::new(0),
        }
    }
}

impl TaskSlot for WorkerSlot {
    fn suspend(&self) {
        if self.waits.fetch_add(1, Ordering::SeqCst) == 0 {
            self.counters.suspend();
            debug!("task slot suspended");
        }
    }

    fn resume(&self) {
        if self.waits.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.counters.resume();
            debug!("task slot resumed");
        }
    }
}

/// Control handle for a spawned [`Worker`].
pub struct WorkerHandle {
    id: WorkerId,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<Result<(), WorkerError>>,
    counters: Arc<TaskCounters>,
    stats: Arc<RwLock<WorkerStats>>,
}

impl WorkerHandle {
    pub fn id(&self) -> &WorkerId {
        &self.id
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight()
    }

    /// Live counter values, read directly.
    pub fn counters(&self) -> WorkerStats {
        self.counters.snapshot()
    }

    /// The last published stats sample.
    pub fn stats(&self) -> WorkerStats {
        self.stats.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Stop dequeuing, drain in-flight tasks and wait for the loop to exit.
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        let _ = self.shutdown_tx.send(true);
        self.join.await.map_err(|e| WorkerError::Join(e.to_string()))?
    }
}
