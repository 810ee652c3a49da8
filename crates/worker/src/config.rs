//! Worker options and the fluent builder that produces them.

use std::time::Duration;

use nimbus_core::config::WorkerConfig;
use nimbus_core::WorkerId;

use crate::error::WorkerError;

/// Fully resolved settings for one [`Worker`](crate::Worker).
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub id: WorkerId,
    pub name: String,
    pub max_concurrent_tasks: usize,
    pub busy_backoff: Duration,
    pub empty_backoff: Duration,
    pub dispatch_delay: Duration,
    pub fault_backoff: Duration,
    pub shutdown_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub stats_interval: Duration,
    /// Parent span of the worker loop and of every task it runs.
    pub span: tracing::Span,
}

// ── WorkerBuilder ────────────────────────────────────────────────────

/// Fluent builder for [`WorkerOptions`].
///
/// # Example
/// ```ignore
/// let options = WorkerBuilder::new("render-farm")
///     .max_concurrent_tasks(4)
///     .empty_backoff(Duration::from_millis(100))
///     .build()?;
/// ```
pub struct WorkerBuilder {
    id: Option<WorkerId>,
    name: String,
    config: WorkerConfig,
    stats_interval: Duration,
    span: Option<tracing::Span>,
}

impl WorkerBuilder {
    /// Builder with the documented default backoffs.
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(name, &WorkerConfig::default())
    }

    /// Builder seeded from loaded configuration.
    pub fn from_config(name: impl Into<String>, config: &WorkerConfig) -> Self {
        Self {
            id: None,
            name: name.into(),
            config: config.clone(),
            stats_interval: Duration::from_secs(5),
            span: None,
        }
    }

    /// Use a fixed worker id instead of a generated one.
    pub fn id(mut self, id: WorkerId) -> Self {
        self.id = Some(id);
        self
    }

    /// Cap on tasks running at once (default: 10).
    pub fn max_concurrent_tasks(mut self, max: usize) -> Self {
        self.config.max_concurrent_tasks = max;
        self
    }

    pub fn busy_backoff(mut self, pause: Duration) -> Self {
        self.config.busy_backoff = pause;
        self
    }

    pub fn empty_backoff(mut self, pause: Duration) -> Self {
        self.config.empty_backoff = pause;
        self
    }

    pub fn dispatch_delay(mut self, pause: Duration) -> Self {
        self.config.dispatch_delay = pause;
        self
    }

    pub fn fault_backoff(mut self, pause: Duration) -> Self {
        self.config.fault_backoff = pause;
        self
    }

    /// How long shutdown waits for in-flight tasks (default: 30s).
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Interval between stats samples (default: 5s).
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Span to run the worker under. Defaults to an `info` span named
    /// `worker` carrying the worker id.
    pub fn span(mut self, span: tracing::Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> Result<WorkerOptions, WorkerError> {
        if self.config.max_concurrent_tasks == 0 {
            return Err(WorkerError::InvalidArgument(
                "max_concurrent_tasks must be at least 1".into(),
            ));
        }
        for (label, interval) in [
            ("heartbeat_interval", self.config.heartbeat_interval),
            ("stats_interval", self.stats_interval),
        ] {
            if interval.is_zero() {
                return Err(WorkerError::InvalidArgument(format!("{label} must be non-zero")));
            }
        }

        let id = self.id.unwrap_or_else(WorkerId::generate);
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("worker", worker_id = %id, name = %self.name));

        Ok(WorkerOptions {
            id,
            name: self.name,
            max_concurrent_tasks: self.config.max_concurrent_tasks,
            busy_backoff: self.config.busy_backoff,
            empty_backoff: self.config.empty_backoff,
            dispatch_delay: self.config.dispatch_delay,
            fault_backoff: self.config.fault_backoff,
            shutdown_timeout: self.config.shutdown_timeout,
            heartbeat_interval: self.config.heartbeat_interval,
            stats_interval: self.stats_interval,
            span,
        })
    }
}
