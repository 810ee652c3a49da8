use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::NimbusError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_u64(profile: &str, key: &str, default: u64) -> u64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_millis(profile: &str, key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(profiled_env_u64(profile, key, default_ms))
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub backend: BackendConfig,
    pub worker: WorkerConfig,
    pub queue: QueueConfig,
    pub runtime: RuntimeConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `NIMBUS_PROFILE`. When set (e.g. `PROD`), every
    /// key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("NIMBUS_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            backend: BackendConfig::from_env_profiled(p),
            worker: WorkerConfig::from_env_profiled(p),
            queue: QueueConfig::from_env_profiled(p),
            runtime: RuntimeConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  backend:  storage={}, queue={}",
            redact(&self.backend.storage_conn),
            redact(&self.backend.queue_conn)
        );
        tracing::info!(
            "  worker:   max_concurrent_tasks={}, busy_backoff={:?}, empty_backoff={:?}, dispatch_delay={:?}, fault_backoff={:?}",
            self.worker.max_concurrent_tasks,
            self.worker.busy_backoff,
            self.worker.empty_backoff,
            self.worker.dispatch_delay,
            self.worker.fault_backoff
        );
        tracing::info!(
            "  queue:    visibility_timeout={:?}, inline_payload_limit={}",
            self.queue.visibility_timeout,
            self.queue.inline_payload_limit
        );
        tracing::info!("  runtime:  cell_poll_interval={:?}", self.runtime.cell_poll_interval);
    }
}

/// Keep only the scheme of a connection string; the rest may carry secrets.
fn redact(conn: &str) -> String {
    match conn.split_once("://") {
        Some((scheme, rest)) if !rest.is_empty() => format!("{scheme}://***"),
        Some((scheme, _)) => format!("{scheme}://"),
        None => "***".to_string(),
    }
}

// ── Backend ───────────────────────────────────────────────────

/// Storage backends this build knows how to connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    Memory,
}

impl BackendKind {
    /// Parse the scheme of a connection string.
    pub fn from_connection_string(conn: &str) -> Result<Self, NimbusError> {
        match conn.split_once("://").map(|(scheme, _)| scheme) {
            Some("memory") => Ok(Self::Memory),
            Some(other) => Err(NimbusError::Config(format!(
                "unsupported backend scheme '{other}'"
            ))),
            None => Err(NimbusError::Config(format!(
                "malformed connection string '{}'",
                redact(conn)
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Blob/key-value storage connection string.
    pub storage_conn: String,
    /// Durable queue connection string.
    pub queue_conn: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            storage_conn: "memory://".to_string(),
            queue_conn: "memory://".to_string(),
        }
    }
}

impl BackendConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            storage_conn: profiled_env_or(p, "NIMBUS_STORAGE_CONN", "memory://"),
            queue_conn: profiled_env_or(p, "NIMBUS_QUEUE_CONN", "memory://"),
        }
    }

    /// Resolve the backend kind, requiring storage and queue to agree.
    pub fn kind(&self) -> Result<BackendKind, NimbusError> {
        let storage = BackendKind::from_connection_string(&self.storage_conn)?;
        let queue = BackendKind::from_connection_string(&self.queue_conn)?;
        if storage != queue {
            return Err(NimbusError::Config(format!(
                "storage backend {storage:?} and queue backend {queue:?} differ"
            )));
        }
        Ok(storage)
    }
}

// ── Worker ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub max_concurrent_tasks: usize,
    /// Pause when the in-flight count has reached the cap.
    pub busy_backoff: Duration,
    /// Pause when the queue had nothing to hand out.
    pub empty_backoff: Duration,
    /// Pause after launching a task, before the next admission check.
    pub dispatch_delay: Duration,
    /// Pause after a loop-level (transport) fault.
    pub fault_backoff: Duration,
    /// How long shutdown waits for in-flight tasks.
    pub shutdown_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 10,
            busy_backoff: Duration::from_millis(500),
            empty_backoff: Duration::from_millis(500),
            dispatch_delay: Duration::from_millis(200),
            fault_backoff: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

impl WorkerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            max_concurrent_tasks: profiled_env_u64(p, "NIMBUS_MAX_CONCURRENT_TASKS", 10) as usize,
            busy_backoff: profiled_env_millis(p, "NIMBUS_BUSY_BACKOFF_MS", 500),
            empty_backoff: profiled_env_millis(p, "NIMBUS_EMPTY_BACKOFF_MS", 500),
            dispatch_delay: profiled_env_millis(p, "NIMBUS_DISPATCH_DELAY_MS", 200),
            fault_backoff: profiled_env_millis(p, "NIMBUS_FAULT_BACKOFF_MS", 1000),
            shutdown_timeout: Duration::from_secs(profiled_env_u64(p, "NIMBUS_SHUTDOWN_TIMEOUT_SECS", 30)),
            heartbeat_interval: Duration::from_secs(profiled_env_u64(p, "NIMBUS_HEARTBEAT_SECS", 10)),
        }
    }
}

// ── Queue ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Lease length; an unacknowledged message reappears after this.
    pub visibility_timeout: Duration,
    /// Serialized tasks above this many bytes are stored as blobs.
    pub inline_payload_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(300),
            inline_payload_limit: 64 * 1024,
        }
    }
}

impl QueueConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            visibility_timeout: Duration::from_secs(profiled_env_u64(p, "NIMBUS_VISIBILITY_TIMEOUT_SECS", 300)),
            inline_payload_limit: profiled_env_u64(p, "NIMBUS_INLINE_PAYLOAD_LIMIT", 64 * 1024) as usize,
        }
    }
}

// ── Runtime ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Poll interval while awaiting result cells and aggregators.
    pub cell_poll_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cell_poll_interval: Duration::from_millis(50),
        }
    }
}

impl RuntimeConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            cell_poll_interval: profiled_env_millis(p, "NIMBUS_CELL_POLL_MS", 50),
        }
    }
}
