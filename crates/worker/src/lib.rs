//! Worker process for a nimbus runtime.
//!
//! A [`Worker`] leases tasks from the runtime queue and runs them with
//! bounded concurrency, backing off when busy, idle or failing.

pub mod config;
pub mod error;
pub mod metrics;
pub mod worker;

pub use config::{WorkerBuilder, WorkerOptions};
pub use error::WorkerError;
pub use metrics::{TaskCounters, WorkerStats};
pub use worker::{Worker, WorkerHandle};
