//! Worker counters and the stats sampler.
//!
//! Task fibers bump lock-free [`TaskCounters`]. A sampler task snapshots them
//! on an interval and sends each snapshot over a bounded channel to a single
//! consumer, which is the only writer of the published [`WorkerStats`].

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

use nimbus_core::OutcomeKind;

/// Published worker statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkerStats {
    pub in_flight: usize,
    /// Highest in-flight count seen since start.
    pub peak_in_flight: usize,
    /// Tasks waiting on children they queued; not counted in `in_flight`.
    pub suspended: usize,
    pub completed: u64,
    /// Tasks whose body raised a fault.
    pub faulted: u64,
    pub cancelled: u64,
    /// Tasks whose outcome could not be recorded.
    pub failed: u64,
    pub avg_task_ms: f64,
    pub sampled_at: Option<DateTime<Utc>>,
}

impl WorkerStats {
    pub fn finished(&self) -> u64 {
        self.completed + self.faulted + self.cancelled + self.failed
    }
}

#[derive(Debug, Default)]
pub struct TaskCounters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    suspended: AtomicUsize,
    completed: AtomicU64,
    faulted: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
    busy_micros: AtomicU64,
}

impl TaskCounters {
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Count one more task in flight, returning the new count.
    pub(crate) fn admit(&self) -> usize {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        now
    }

    pub(crate) fn release(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn suspended(&self) -> usize {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Move one in-flight task to suspended, freeing its slot.
    pub(crate) fn suspend(&self) {
        self.suspended.fetch_add(1, Ordering::SeqCst);
        self.release();
    }

    /// Take a slot back for a suspended task. May briefly exceed the cap.
    pub(crate) fn resume(&self) {
        self.admit();
        self.suspended.fetch_sub(1, Ordering::SeqCst);
    }

    /// Record a finished task. `None` means the outcome never got recorded.
    pub(crate) fn record(&self, outcome: Option<OutcomeKind>, elapsed: Duration) {
        let counter = match outcome {
            Some(OutcomeKind::Completed) => &self.completed,
            Some(OutcomeKind::Exception) => &self.faulted,
            Some(OutcomeKind::Cancelled) => &self.cancelled,
            None => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.busy_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> WorkerStats {
        let mut stats = WorkerStats {
            in_flight: self.in_flight(),
            peak_in_flight: self.peak_in_flight(),
            suspended: self.suspended(),
            completed: self.completed.load(Ordering::SeqCst),
            faulted: self.faulted.load(Ordering::SeqCst),
            cancelled: self.cancelled.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            avg_task_ms: 0.0,
            sampled_at: Some(Utc::now()),
        };
        let finished = stats.finished();
        if finished > 0 {
            stats.avg_task_ms = self.busy_micros.load(Ordering::SeqCst) as f64 / finished as f64 / 1000.0;
        }
        stats
    }
}

#[derive(Debug)]
pub(crate) enum StatsMessage {
    Sample(WorkerStats),
    Shutdown,
}

/// Sampler plus consumer pair feeding a shared [`WorkerStats`].
pub(crate) struct StatsSampler {
    tx: mpsc::Sender<StatsMessage>,
    sampler: JoinHandle<()>,
    consumer: JoinHandle<()>,
    counters: Arc<TaskCounters>,
}

impl StatsSampler {
    pub(crate) fn spawn(
        counters: Arc<TaskCounters>,
        published: Arc<RwLock<WorkerStats>>,
        interval: Duration,
        span: tracing::Span,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<StatsMessage>(16);

        let consumer = tokio::spawn(
            async move {
                while let Some(message) = rx.recv().await {
                    match message {
                        StatsMessage::Sample(sample) => {
                            if let Ok(mut stats) = published.write() {
                                *stats = sample;
                            }
                        }
                        StatsMessage::Shutdown => break,
                    }
                }
                debug!("stats consumer stopped");
            }
            .instrument(span.clone()),
        );

        let sampler_tx = tx.clone();
        let sampler_counters = counters.clone();
        let sampler = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let sample = sampler_counters.snapshot();
                    if sampler_tx.send(StatsMessage::Sample(sample)).await.is_err() {
                        break;
                    }
                }
            }
            .instrument(span),
        );

        Self {
            tx,
            sampler,
            consumer,
            counters,
        }
    }

    /// Stop sampling, publish one last snapshot and wait for the consumer.
    pub(crate) async fn shutdown(self) {
        self.sampler.abort();
        let _ = self.tx.send(StatsMessage::Sample(self.counters.snapshot())).await;
        let _ = self.tx.send(StatsMessage::Shutdown).await;
        let _ = self.consumer.await;
    }
}
