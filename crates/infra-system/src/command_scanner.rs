// Command scanner: one probe subprocess per candidate
// reason: tokio::process for async spawn with kill-on-drop timeouts
use async_trait::async_trait;
use rangescan_core::domain::CandidateId;
use rangescan_core::error::{AppError, Result};
use rangescan_core::port::{ScanError, ScanVerdict, Scanner};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::http_scanner::ID_PLACEHOLDER;

/// Exit code contract of a probe program
const EXIT_HIT: i32 = 0;
const EXIT_MISS: i32 = 1;

/// Longest stdout kept in a hit payload
const MAX_PAYLOAD_BYTES: usize = 4096;

/// Runs `program args..` with `{id}` substituted in every argument
///
/// Exit 0 is a hit (trimmed stdout becomes the payload), exit 1 a miss,
/// anything else a probe failure. The child sees only allowlisted
/// environment variables and is killed when the timeout fires.
pub struct CommandScanner {
    program: String,
    args: Vec<String>,
    env_allowlist: Vec<String>,
    timeout: Duration,
}

impl CommandScanner {
    /// # Errors
    /// - AppError::InvalidConfig if the program is empty
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        env_allowlist: Vec<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let program = program.into();
        if program.trim().is_empty() {
            return Err(AppError::InvalidConfig(
                "probe command must not be empty".to_string(),
            ));
        }
        Ok(Self {
            program,
            args,
            env_allowlist,
            timeout,
        })
    }

    /// Split a shell-like command line on whitespace (no quoting)
    pub fn from_command_line(
        command_line: &str,
        env_allowlist: Vec<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next().unwrap_or_default();
        Self::new(program, parts.collect(), env_allowlist, timeout)
    }

    fn args_for(&self, candidate_id: CandidateId) -> Vec<String> {
        let id = candidate_id.to_string();
        self.args
            .iter()
            .map(|arg| arg.replace(ID_PLACEHOLDER, &id))
            .collect()
    }

    fn allowed_env(&self) -> Vec<(String, String)> {
        self.env_allowlist
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.clone(), value)))
            .collect()
    }
}

#[async_trait]
impl Scanner for CommandScanner {
    async fn scan(&self, candidate_id: CandidateId) -> std::result::Result<ScanVerdict, ScanError> {
        let child = Command::new(&self.program)
            .args(self.args_for(candidate_id))
            .env_clear()
            .envs(self.allowed_env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScanError::ProbeFailed(format!("spawn {}: {}", self.program, e)))?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ScanError::ProbeFailed(e.to_string())),
            Err(_) => return Err(ScanError::Timeout(self.timeout.as_millis() as u64)),
        };

        let code = output.status.code();
        debug!(candidate_id, exit_code = ?code, "Probe exited");

        match code {
            Some(EXIT_HIT) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stdout = stdout.trim();
                let payload = if stdout.is_empty() {
                    None
                } else {
                    let end = stdout
                        .char_indices()
                        .map(|(i, c)| i + c.len_utf8())
                        .take_while(|&end| end <= MAX_PAYLOAD_BYTES)
                        .last()
                        .unwrap_or(0);
                    Some(serde_json::json!({ "stdout": &stdout[..end] }))
                };
                Ok(ScanVerdict::Hit { payload })
            }
            Some(EXIT_MISS) => Ok(ScanVerdict::Miss),
            other => Err(ScanError::ProbeFailed(format!(
                "exit {:?}: {}",
                other,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
        }
    }
}
