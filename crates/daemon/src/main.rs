//! Rangescan worker daemon
//! Leases chunks from the shared queue, scans them, persists results, acks.

mod config;
mod logging;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use config::WorkerArgs;
use rangescan_core::application::{shutdown_channel, NodeReporter, ShutdownSender, WorkerPool};
use rangescan_core::port::id_provider::UuidProvider;
use rangescan_core::port::time_provider::SystemTimeProvider;
use rangescan_core::port::Scanner;
use rangescan_infra_sqlite::{
    open_database, SqliteNodeRegistry, SqliteQueueBroker, SqliteResultSink,
};
use rangescan_infra_system::{default_node_id, CommandScanner, HttpScanner};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let args = WorkerArgs::parse();

    // Held until exit so the progress log is flushed
    let _log_guard = logging::init(&args.log_dir())?;

    info!("Rangescan worker v{} starting...", VERSION);

    let pool_config = args.pool_config()?;
    let node_id = args.node_id.clone().unwrap_or_else(default_node_id);

    // 1. Databases
    let queue_db = args.queue_db();
    let results_db = args.results_db();
    info!(queue_db = %queue_db, results_db = %results_db, save_db = args.save_db, "Opening databases...");

    let queue_pool = open_database(&queue_db)
        .await
        .with_context(|| format!("cannot open queue database {}", queue_db))?;
    let results_pool = if results_db == queue_db {
        queue_pool.clone()
    } else {
        open_database(&results_db)
            .await
            .with_context(|| format!("cannot open results database {}", results_db))?
    };

    // 2. Wiring
    let time_provider = Arc::new(SystemTimeProvider);
    let broker = Arc::new(SqliteQueueBroker::new(
        queue_pool.clone(),
        time_provider.clone(),
        Arc::new(UuidProvider),
        args.visibility_timeout(),
    ));
    let sink = Arc::new(SqliteResultSink::new(results_pool));
    let registry = Arc::new(SqliteNodeRegistry::new(queue_pool));
    let reporter = Arc::new(NodeReporter::new(
        node_id.clone(),
        registry,
        time_provider.clone(),
    ));
    let scanner = build_scanner(&args)?;

    let pool = WorkerPool::new(pool_config, broker, sink, scanner, reporter, time_provider)?;

    // 3. Run until stopped
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let mut worker_handle: JoinHandle<()> = tokio::spawn(async move {
        if let Err(e) = pool.run(shutdown_rx).await {
            error!(error = %e, "Worker pool failed");
        }
    });

    info!(node_id = %node_id, concurrency = args.concurrency, "Worker ready. Press Ctrl+C to drain, twice to abandon");

    tokio::select! {
        _ = &mut worker_handle => {
            info!("Worker pool exited");
            return Ok(());
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl+C")?;
        }
    }

    info!(grace_secs = args.shutdown_grace_secs, "Stop requested, draining in-flight chunk...");
    shutdown_tx.shutdown();
    if !drain_or_abandon(&shutdown_tx, &mut worker_handle, &args).await {
        if let Err(e) = worker_handle.await {
            error!(error = %e, "Worker task did not exit cleanly");
        }
    }
    info!("Shutdown complete.");

    Ok(())
}

/// Wait for the drain; a second Ctrl+C or the grace timeout abandons the chunk
///
/// Returns true if the worker already exited.
async fn drain_or_abandon(
    shutdown_tx: &ShutdownSender,
    worker_handle: &mut JoinHandle<()>,
    args: &WorkerArgs,
) -> bool {
    tokio::select! {
        _ = &mut *worker_handle => return true,
        _ = tokio::signal::ctrl_c() => {
            warn!("Second stop signal, abandoning in-flight chunk");
        }
        _ = tokio::time::sleep(args.shutdown_grace()) => {
            warn!(grace_secs = args.shutdown_grace_secs, "Drain grace exceeded, abandoning in-flight chunk");
        }
    }
    shutdown_tx.abandon();
    false
}

fn build_scanner(args: &WorkerArgs) -> Result<Arc<dyn Scanner>> {
    let timeout = args.scan_timeout();
    match (&args.scan_url, &args.probe_cmd) {
        (Some(url), _) => {
            info!(url_template = %url, "Using HTTP scanner");
            Ok(Arc::new(HttpScanner::new(url.clone(), timeout)?))
        }
        (None, Some(command_line)) => {
            info!(command = %command_line, "Using command scanner");
            Ok(Arc::new(CommandScanner::from_command_line(
                command_line,
                args.probe_env.clone(),
                timeout,
            )?))
        }
        (None, None) => anyhow::bail!("either --scan-url or --probe-cmd is required"),
    }
}
