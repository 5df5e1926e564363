// Table rows and formatting for CLI output

use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use rangescan_core::application::WorkerStatus;
use rangescan_core::domain::{Liveness, StoredResult};
use tabled::Tabled;

#[derive(Tabled)]
pub struct WorkerRow {
    #[tabled(rename = "NODE")]
    pub node_id: String,
    #[tabled(rename = "LIVENESS")]
    pub liveness: String,
    #[tabled(rename = "STATE")]
    pub state: String,
    #[tabled(rename = "JOB")]
    pub job: String,
    #[tabled(rename = "LAST ID")]
    pub last_id: String,
    #[tabled(rename = "PROCESSED")]
    pub processed: u64,
    #[tabled(rename = "LAST PROGRESS")]
    pub last_progress: String,
    #[tabled(rename = "LAST SEEN")]
    pub last_seen: String,
}

impl WorkerRow {
    pub fn from_status(worker: &WorkerStatus, now_millis: i64) -> Self {
        Self {
            node_id: worker.node_id.clone(),
            liveness: liveness_label(worker.liveness).to_string(),
            state: worker.state.as_str().to_string(),
            job: worker.current_job_id.clone().unwrap_or_else(|| "-".to_string()),
            last_id: worker
                .last_progress
                .map(|p| p.candidate_id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            processed: worker.processed_count,
            last_progress: worker
                .last_progress
                .map(|p| ago(now_millis, p.at))
                .unwrap_or_else(|| "never".to_string()),
            last_seen: ago(now_millis, worker.last_seen_at),
        }
    }
}

#[derive(Tabled)]
pub struct ResultRow {
    #[tabled(rename = "CANDIDATE")]
    pub candidate_id: i64,
    #[tabled(rename = "OUTCOME")]
    pub outcome: String,
    #[tabled(rename = "DISCOVERED")]
    pub discovered_at: String,
    #[tabled(rename = "WRITES")]
    pub write_count: i64,
    #[tabled(rename = "PAYLOAD")]
    pub payload: String,
}

impl From<&StoredResult> for ResultRow {
    fn from(row: &StoredResult) -> Self {
        Self {
            candidate_id: row.candidate_id,
            outcome: row.outcome.to_string(),
            discovered_at: timestamp(row.discovered_at),
            write_count: row.write_count,
            payload: row
                .payload
                .as_ref()
                .map(|p| truncate(&p.to_string(), 60))
                .unwrap_or_default(),
        }
    }
}

pub fn liveness_label(liveness: Liveness) -> ColoredString {
    let label = liveness.to_string();
    let label = label.as_str();
    match liveness {
        Liveness::Active => label.green().bold(),
        Liveness::Idle => label.normal(),
        Liveness::Stalled => label.yellow().bold(),
        Liveness::CrashLooping | Liveness::Down => label.red().bold(),
        Liveness::Stopped => label.dimmed(),
    }
}

/// Epoch millis as RFC 3339 (UTC, second precision)
pub fn timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Coarse relative age, e.g. "42s ago", "3m ago", "2h ago"
pub fn ago(now_millis: i64, then_millis: i64) -> String {
    let secs = (now_millis - then_millis).max(0) / 1000;
    match secs {
        s if s < 60 => format!("{}s ago", s),
        s if s < 3600 => format!("{}m ago", s / 60),
        s if s < 86_400 => format!("{}h ago", s / 3600),
        s => format!("{}d ago", s / 86_400),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
