// Worker daemon configuration
// Every knob takes a flag or a RANGESCAN_* environment variable

use anyhow::{bail, Result};
use clap::{ArgGroup, Parser};
use rangescan_core::application::worker::constants::{
    DEFAULT_CONCURRENCY, DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_RECEIVE_BATCH, DEFAULT_RECEIVE_WAIT,
    DEFAULT_SHUTDOWN_GRACE, DEFAULT_VISIBILITY_TIMEOUT, MAX_SCAN_ATTEMPTS,
};
use rangescan_core::application::WorkerPoolConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_QUEUE_DB: &str = "~/.rangescan/queue.db";
pub const DEFAULT_LOCAL_RESULTS_DB: &str = "~/.rangescan/results.db";
pub const DEFAULT_LOG_DIR: &str = "~/.rangescan/logs";
const DEFAULT_SCAN_TIMEOUT_MS: u64 = 10_000;

#[derive(Parser, Debug)]
#[command(name = "rangescan-worker")]
#[command(about = "Rangescan worker: consumes scan chunks until stopped", long_about = None)]
#[command(version)]
#[command(group(ArgGroup::new("probe").required(true).args(["scan_url", "probe_cmd"])))]
pub struct WorkerArgs {
    /// Shared queue database
    #[arg(long, env = "RANGESCAN_DB", default_value = DEFAULT_QUEUE_DB)]
    pub db: String,

    /// Write results to the shared results database instead of the local one
    #[arg(long, env = "RANGESCAN_SAVE_DB")]
    pub save_db: bool,

    /// Shared results database (defaults to the queue database)
    #[arg(long, env = "RANGESCAN_RESULTS_DB")]
    pub results_db: Option<String>,

    /// Local results database used without --save-db
    #[arg(long, env = "RANGESCAN_LOCAL_DB", default_value = DEFAULT_LOCAL_RESULTS_DB)]
    pub local_db: String,

    /// Concurrent scan tasks per chunk
    #[arg(short, long, env = "RANGESCAN_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Minimum gap between the requests of one scan task
    #[arg(short, long, env = "RANGESCAN_DELAY_MS", default_value_t = 0)]
    pub delay_ms: u64,

    /// HTTP probe URL template containing {id}
    #[arg(long, env = "RANGESCAN_SCAN_URL")]
    pub scan_url: Option<String>,

    /// Probe command line; {id} in any argument is replaced by the candidate
    #[arg(long, env = "RANGESCAN_PROBE_CMD")]
    pub probe_cmd: Option<String>,

    /// Per-request probe timeout
    #[arg(long, env = "RANGESCAN_SCAN_TIMEOUT_MS", default_value_t = DEFAULT_SCAN_TIMEOUT_MS)]
    pub scan_timeout_ms: u64,

    /// Environment variables passed through to the probe command
    #[arg(long, env = "RANGESCAN_PROBE_ENV", value_delimiter = ',', default_value = "PATH,HOME")]
    pub probe_env: Vec<String>,

    /// Node ID reported to the status monitor (defaults to the hostname)
    #[arg(long, env = "RANGESCAN_NODE_ID")]
    pub node_id: Option<String>,

    /// Lease length granted on receive and on every heartbeat
    #[arg(long, env = "RANGESCAN_VISIBILITY_TIMEOUT_SECS", default_value_t = DEFAULT_VISIBILITY_TIMEOUT.as_secs())]
    pub visibility_timeout_secs: u64,

    #[arg(long, env = "RANGESCAN_HEARTBEAT_SECS", default_value_t = DEFAULT_HEARTBEAT_INTERVAL.as_secs())]
    pub heartbeat_secs: u64,

    #[arg(long, env = "RANGESCAN_RECEIVE_WAIT_SECS", default_value_t = DEFAULT_RECEIVE_WAIT.as_secs())]
    pub receive_wait_secs: u64,

    #[arg(long, env = "RANGESCAN_RECEIVE_BATCH", default_value_t = DEFAULT_RECEIVE_BATCH)]
    pub receive_batch: usize,

    /// Attempts per candidate before recording an error outcome
    #[arg(long, env = "RANGESCAN_MAX_SCAN_ATTEMPTS", default_value_t = MAX_SCAN_ATTEMPTS)]
    pub max_scan_attempts: u32,

    /// Drain time after the first stop signal before abandoning the chunk
    #[arg(long, env = "RANGESCAN_SHUTDOWN_GRACE_SECS", default_value_t = DEFAULT_SHUTDOWN_GRACE.as_secs())]
    pub shutdown_grace_secs: u64,

    /// Directory of the JSON progress log
    #[arg(long, env = "RANGESCAN_LOG_DIR", default_value = DEFAULT_LOG_DIR)]
    pub log_dir: String,
}

impl WorkerArgs {
    pub fn queue_db(&self) -> String {
        expand(&self.db)
    }

    /// Database the result sink writes to
    pub fn results_db(&self) -> String {
        if self.save_db {
            self.results_db
                .as_deref()
                .map(expand)
                .unwrap_or_else(|| self.queue_db())
        } else {
            expand(&self.local_db)
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(expand(&self.log_dir))
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn pool_config(&self) -> Result<WorkerPoolConfig> {
        let heartbeat = Duration::from_secs(self.heartbeat_secs);
        if heartbeat >= self.visibility_timeout() {
            bail!(
                "heartbeat interval ({}s) must be shorter than the visibility timeout ({}s)",
                self.heartbeat_secs,
                self.visibility_timeout_secs
            );
        }

        let config = WorkerPoolConfig {
            concurrency: self.concurrency,
            delay: Duration::from_millis(self.delay_ms),
            receive_batch: self.receive_batch,
            receive_wait: Duration::from_secs(self.receive_wait_secs),
            heartbeat_interval: heartbeat,
            lease_extension: self.visibility_timeout(),
            max_scan_attempts: self.max_scan_attempts,
        };
        config.validate()?;
        Ok(config)
    }
}

fn expand(path: &str) -> String {
    shellexpand::tilde(path).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> WorkerArgs {
        let mut argv = vec!["rangescan-worker"];
        argv.extend_from_slice(args);
        WorkerArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_a_probe_is_required() {
        assert!(WorkerArgs::try_parse_from(["rangescan-worker"]).is_err());
        assert!(WorkerArgs::try_parse_from([
            "rangescan-worker",
            "--scan-url",
            "http://x/{id}",
            "--probe-cmd",
            "probe {id}",
        ])
        .is_err());
    }

    #[test]
    fn test_pool_config_from_flags() {
        let args = parse(&["--scan-url", "http://x/{id}", "-c", "16", "-d", "250"]);
        let config = args.pool_config().unwrap();
        assert_eq!(config.concurrency, 16);
        assert_eq!(config.delay, Duration::from_millis(250));
        assert_eq!(config.lease_extension, DEFAULT_VISIBILITY_TIMEOUT);
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let args = parse(&["--scan-url", "http://x/{id}", "--concurrency", "0"]);
        assert!(args.pool_config().is_err());
    }

    #[test]
    fn test_heartbeat_must_fit_in_lease() {
        let args = parse(&[
            "--scan-url",
            "http://x/{id}",
            "--visibility-timeout-secs",
            "30",
            "--heartbeat-secs",
            "30",
        ]);
        assert!(args.pool_config().is_err());
    }

    #[test]
    fn test_save_db_selects_shared_results() {
        let local = parse(&["--probe-cmd", "p {id}", "--db", "/tmp/q.db", "--local-db", "/tmp/l.db"]);
        assert_eq!(local.results_db(), "/tmp/l.db");

        let shared = parse(&["--probe-cmd", "p {id}", "--db", "/tmp/q.db", "--save-db"]);
        assert_eq!(shared.results_db(), "/tmp/q.db");

        let separate = parse(&[
            "--probe-cmd",
            "p {id}",
            "--save-db",
            "--results-db",
            "/tmp/r.db",
        ]);
        assert_eq!(separate.results_db(), "/tmp/r.db");
    }
}
