//! nimbus-worker: runs tasks from a nimbus runtime queue.
//!
//! The runtime to attach to is passed as a base64 runtime descriptor
//! (`--state`); without one the worker connects using environment
//! configuration. Memory backends live inside this process only, so
//! against `memory://` the worker is only useful with `--demo`, which
//! submits a sample fan-out process, prints its result and exits.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use nimbus_core::config::load_dotenv;
use nimbus_core::{Config, TaskFault};
use nimbus_runtime::{RuntimeDescriptor, RuntimeError, RuntimeState, WorkflowCall, WorkflowRegistry};
use nimbus_worker::{Worker, WorkerBuilder};

// ── CLI ─────────────────────────────────────────────────────────────

/// Nimbus worker. Leases tasks from the runtime queue and runs them.
#[derive(Parser, Debug)]
#[command(name = "nimbus-worker", version, about)]
struct Cli {
    /// Base64-encoded runtime descriptor.
    #[arg(long, env = "NIMBUS_RUNTIME_STATE")]
    state: Option<String>,

    /// Maximum number of tasks run at once.
    #[arg(long, env = "NIMBUS_MAX_CONCURRENT_TASKS")]
    max_tasks: Option<usize>,

    /// Name reported to the worker registry.
    #[arg(long, env = "NIMBUS_WORKER_NAME", default_value = "nimbus-worker")]
    name: String,

    /// Submit a sample process, print its result and exit.
    #[arg(long)]
    demo: bool,
}

// ── Workflows ───────────────────────────────────────────────────────

fn workflows() -> WorkflowRegistry {
    let mut registry = WorkflowRegistry::new();
    registry
        .register_typed("square", |_ctx, n: i64| async move { Ok(n * n) })
        .register_typed("sum_of_squares", |ctx, numbers: Vec<i64>| async move {
            let calls = numbers
                .iter()
                .map(|n| WorkflowCall::new("square", n))
                .collect::<Result<Vec<_>, _>>()?;
            let squares: Vec<i64> = ctx.parallel_as(calls).await?;
            Ok::<_, RuntimeError>(squares.iter().sum::<i64>())
        })
        .register_typed("checked_sqrt", |_ctx, n: i64| async move {
            if n < 0 {
                return Err(RuntimeError::from(TaskFault::failed("domain", format!("{n} is negative"))));
            }
            Ok((n as f64).sqrt())
        });
    registry
}

async fn run_demo(state: &RuntimeState) -> anyhow::Result<()> {
    let numbers: Vec<i64> = (1..=10).collect();
    let process = state
        .start_as_process::<i64>(
            "sum_of_squares",
            WorkflowCall::new("sum_of_squares", &numbers)?,
            vec![],
        )
        .await?;
    info!(process_id = %process.id(), "demo process submitted");

    let total = tokio::time::timeout(Duration::from_secs(60), process.result()).await??;
    println!("sum of squares 1..=10 = {total}");

    let record = process.record().await?;
    println!("process {} finished as {}", record.info.process_id, record.status);
    Ok(())
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(encoded) = &cli.state {
        RuntimeDescriptor::decode(encoded)?.apply_to(&mut config);
    }
    if let Some(max) = cli.max_tasks {
        config.worker.max_concurrent_tasks = max;
    }
    config.log_summary();

    let state = RuntimeDescriptor::from_config(&config).connect()?;
    let options = WorkerBuilder::from_config(&cli.name, &config.worker).build()?;
    info!(worker_id = %options.id, "starting nimbus-worker");

    let registry = Arc::new(workflows());
    info!(workflows = ?registry.names(), "workflows registered");
    let handle = Worker::new(options, state.clone(), registry).spawn();

    if cli.demo {
        let result = run_demo(&state).await;
        handle.shutdown().await?;
        return result;
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let stats = handle.stats();
    handle.shutdown().await?;
    info!(
        completed = stats.completed,
        faulted = stats.faulted,
        cancelled = stats.cancelled,
        "nimbus-worker exited cleanly"
    );
    Ok(())
}
