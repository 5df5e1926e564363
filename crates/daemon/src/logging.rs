// Logging setup
// stderr: pretty or JSON (RANGESCAN_LOG_FORMAT), plus a JSON progress log file

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_FILTER: &str = "rangescan=info";
const PROGRESS_LOG_FILE: &str = "rangescan-worker.jsonl";

/// Install the global subscriber
///
/// The returned guard flushes the file writer when dropped; hold it until exit.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
    let log_format = std::env::var("RANGESCAN_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))
        .context("invalid log filter")?;

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;
    let file_appender = tracing_appender::rolling::never(log_dir, PROGRESS_LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = match log_format.as_str() {
        "json" => fmt::layer().json().with_writer(std::io::stderr).boxed(),
        _ => fmt::layer().pretty().with_writer(std::io::stderr).boxed(),
    };

    let file_layer = fmt::layer()
        .json()
        .with_ansi(false)
        .with_writer(file_writer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("failed to install tracing subscriber")?;

    Ok(guard)
}
