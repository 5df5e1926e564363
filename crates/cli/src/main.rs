//! Rangescan CLI - enqueue ID ranges, inspect workers and results
//! Talks to the shared SQLite databases directly.

mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tabled::Table;
use tracing_subscriber::EnvFilter;

use output::{liveness_label, ResultRow, WorkerRow};
use rangescan_core::application::worker::constants::DEFAULT_VISIBILITY_TIMEOUT;
use rangescan_core::application::{EnqueueRequest, ScanRunService, StatusMonitor};
use rangescan_core::domain::{CandidateId, QueueSnapshot, ScanOutcome};
use rangescan_core::port::id_provider::UuidProvider;
use rangescan_core::port::time_provider::SystemTimeProvider;
use rangescan_core::port::{ResultSink, TimeProvider};
use rangescan_infra_sqlite::{
    open_database, SqliteNodeRegistry, SqliteQueueBroker, SqliteResultSink,
};

const DEFAULT_DB_PATH: &str = "~/.rangescan/queue.db";
const DEFAULT_LOCAL_RESULTS_DB: &str = "~/.rangescan/results.db";

#[derive(Parser)]
#[command(name = "rangescan")]
#[command(about = "Rangescan CLI: distributed ID-range scanning", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Shared queue database
    #[arg(long, global = true, env = "RANGESCAN_DB", default_value = DEFAULT_DB_PATH)]
    db: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition an inclusive ID range into chunks and enqueue them
    Enqueue {
        #[arg(long)]
        start_id: CandidateId,

        #[arg(long)]
        end_id: CandidateId,

        /// IDs per chunk
        #[arg(long, default_value = "1000")]
        chunk_size: i64,

        /// Print the queue snapshot afterwards
        #[arg(long)]
        status: bool,
    },

    /// Show queue depth and worker liveness
    Status {
        /// Machine-readable output
        #[arg(long)]
        json: bool,

        /// Minutes without a heartbeat before a node counts as down
        #[arg(long, default_value = "10")]
        freshness_mins: u64,
    },

    /// Show stored scan results
    Results {
        /// Outcome to list (hit, miss, error)
        #[arg(short, long, default_value = "hit")]
        outcome: ScanOutcome,

        /// Maximum rows listed
        #[arg(short = 'n', long, default_value = "50")]
        limit: u32,

        /// Read the shared results database instead of the local one
        #[arg(long)]
        save_db: bool,

        /// Shared results database (defaults to --db)
        #[arg(long, env = "RANGESCAN_RESULTS_DB")]
        results_db: Option<String>,

        /// Local results database written by workers without --save-db
        #[arg(long, env = "RANGESCAN_LOCAL_DB", default_value = DEFAULT_LOCAL_RESULTS_DB)]
        local_db: String,
    },
}

fn expand(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

fn queue_broker(pool: rangescan_infra_sqlite::SqlitePool) -> Arc<SqliteQueueBroker> {
    Arc::new(SqliteQueueBroker::new(
        pool,
        Arc::new(SystemTimeProvider),
        Arc::new(UuidProvider),
        DEFAULT_VISIBILITY_TIMEOUT,
    ))
}

fn print_snapshot(snapshot: &QueueSnapshot) {
    println!("  {} {}", "Waiting:".bold(), snapshot.waiting_count);
    println!("  {} {}", "In flight:".bold(), snapshot.in_flight_count);
    println!("  {} {}", "Total:".bold(), snapshot.total());
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("rangescan=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db_path = expand(&cli.db);

    match cli.command {
        Commands::Enqueue {
            start_id,
            end_id,
            chunk_size,
            status,
        } => {
            let pool = open_database(&db_path)
                .await
                .with_context(|| format!("Failed to open queue database {}", db_path))?;
            let service = ScanRunService::new(
                queue_broker(pool),
                Arc::new(UuidProvider),
                Arc::new(SystemTimeProvider),
            );

            let report = service
                .enqueue(EnqueueRequest {
                    start_id,
                    end_id,
                    chunk_size,
                })
                .await
                .context("Enqueue failed")?;

            println!(
                "{}",
                format!("✓ Enqueued {} jobs", report.jobs_enqueued)
                    .green()
                    .bold()
            );
            if let (Some(first), Some(last)) = (report.first_range, report.last_range) {
                println!("  {} {} .. {}", "Chunks:".bold(), first, last);
            }

            if status {
                println!();
                println!("{}", "Queue".cyan().bold());
                print_snapshot(&service.snapshot().await?);
            }
        }

        Commands::Status {
            json,
            freshness_mins,
        } => {
            let pool = open_database(&db_path)
                .await
                .with_context(|| format!("Failed to open queue database {}", db_path))?;
            let clock = Arc::new(SystemTimeProvider);
            let monitor = StatusMonitor::new(
                queue_broker(pool.clone()),
                Arc::new(SqliteNodeRegistry::new(pool)),
                clock.clone(),
            )
            .with_window(Duration::from_secs(freshness_mins * 60));

            let status = monitor.status().await.context("Failed to read status")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(());
            }

            println!("{}", "Queue".cyan().bold());
            println!("  {} {}", "Database:".bold(), db_path);
            print_snapshot(&status.queue);
            println!();

            println!("{}", "Workers".cyan().bold());
            if status.workers.is_empty() {
                println!("  {}", "No workers have registered".yellow());
            } else {
                let now = clock.now_millis();
                let rows: Vec<WorkerRow> = status
                    .workers
                    .iter()
                    .map(|w| WorkerRow::from_status(w, now))
                    .collect();
                println!("{}", Table::new(rows));

                let unhealthy: Vec<_> = status
                    .workers
                    .iter()
                    .filter(|w| w.liveness.is_unhealthy())
                    .collect();
                for worker in unhealthy {
                    println!(
                        "  {} {} is {} ({} restarts since last progress)",
                        "!".red().bold(),
                        worker.node_id,
                        liveness_label(worker.liveness),
                        worker.restarts_since_progress
                    );
                }
            }
        }

        Commands::Results {
            outcome,
            limit,
            save_db,
            results_db,
            local_db,
        } => {
            let path = if save_db {
                results_db.as_deref().map(expand).unwrap_or(db_path)
            } else {
                expand(&local_db)
            };
            let pool = open_database(&path)
                .await
                .with_context(|| format!("Failed to open results database {}", path))?;
            let sink = SqliteResultSink::new(pool);

            println!("{}", "Results".cyan().bold());
            println!("  {} {}", "Database:".bold(), path);
            let counts = sink.count_by_outcome().await?;
            for known in ScanOutcome::ALL {
                let count = counts.get(known.as_str()).copied().unwrap_or(0);
                println!("  {} {}", format!("{}:", known).bold(), count);
            }
            println!();

            let rows = sink.list_by_outcome(outcome, limit).await?;
            if rows.is_empty() {
                println!("  {}", format!("No {} results", outcome).yellow());
            } else {
                let rows: Vec<ResultRow> = rows.iter().map(ResultRow::from).collect();
                println!("{}", Table::new(rows));
            }
        }
    }

    Ok(())
}
