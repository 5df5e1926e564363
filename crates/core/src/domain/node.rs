// Worker Node Domain Model

use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};
use super::scan_job::{CandidateId, JobId};

/// Fleet node identifier (one worker pool process per node)
pub type NodeId = String;

/// Worker pool state machine
///
/// ```text
/// IDLE -> RECEIVING -> SCANNING -> PERSISTING -> ACKING -> IDLE
///                      SCANNING | PERSISTING -> ERROR -> IDLE
///                      SCANNING -> IDLE                    (abandoned on stop)
/// any -> TERMINATING -> STOPPED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerState {
    Idle,
    Receiving,
    Scanning,
    Persisting,
    Acking,
    Error,
    Terminating,
    Stopped,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "IDLE",
            WorkerState::Receiving => "RECEIVING",
            WorkerState::Scanning => "SCANNING",
            WorkerState::Persisting => "PERSISTING",
            WorkerState::Acking => "ACKING",
            WorkerState::Error => "ERROR",
            WorkerState::Terminating => "TERMINATING",
            WorkerState::Stopped => "STOPPED",
        }
    }

    /// True while a chunk is held by this node
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            WorkerState::Scanning | WorkerState::Persisting | WorkerState::Acking | WorkerState::Error
        )
    }

    /// Validate and perform a transition
    pub fn transition(self, next: WorkerState) -> Result<WorkerState> {
        use WorkerState::*;

        let allowed = match (self, next) {
            (Stopped, _) => false,
            (Terminating, Stopped) => true,
            (_, Terminating) => true,
            (Idle, Receiving) | (Idle, Scanning) => true,
            (Receiving, Idle) | (Receiving, Scanning) => true,
            (Scanning, Persisting) | (Scanning, Error) | (Scanning, Idle) => true,
            (Persisting, Acking) | (Persisting, Error) => true,
            (Acking, Idle) => true,
            (Error, Idle) => true,
            _ => false,
        };

        if allowed {
            Ok(next)
        } else {
            Err(DomainError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkerState {
    type Err = DomainError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "IDLE" => Ok(WorkerState::Idle),
            "RECEIVING" => Ok(WorkerState::Receiving),
            "SCANNING" => Ok(WorkerState::Scanning),
            "PERSISTING" => Ok(WorkerState::Persisting),
            "ACKING" => Ok(WorkerState::Acking),
            "ERROR" => Ok(WorkerState::Error),
            "TERMINATING" => Ok(WorkerState::Terminating),
            "STOPPED" => Ok(WorkerState::Stopped),
            other => Err(DomainError::ValidationError(format!(
                "unknown worker state: {}",
                other
            ))),
        }
    }
}

/// Last processed candidate of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMarker {
    pub candidate_id: CandidateId,
    pub at: i64, // epoch ms
}

/// Progress record of one node, as held by the node registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeProgress {
    pub node_id: NodeId,
    pub state: WorkerState,
    pub current_job_id: Option<JobId>,
    pub last_candidate_id: Option<CandidateId>,
    pub processed_count: u64,
    pub last_progress_at: Option<i64>,
    pub last_seen_at: i64,
    pub state_changed_at: i64,
    pub started_at: i64,
    /// Registrations since the node last recorded progress
    pub restarts_since_progress: u32,
}

impl NodeProgress {
    /// Fresh record for a first registration
    pub fn registered(node_id: impl Into<String>, now_millis: i64) -> Self {
        Self {
            node_id: node_id.into(),
            state: WorkerState::Idle,
            current_job_id: None,
            last_candidate_id: None,
            processed_count: 0,
            last_progress_at: None,
            last_seen_at: now_millis,
            state_changed_at: now_millis,
            started_at: now_millis,
            restarts_since_progress: 0,
        }
    }

    /// Re-registration after a process restart. Coming back from a clean
    /// `Stopped` exit does not count toward crash looping.
    pub fn restarted(&mut self, now_millis: i64) {
        if self.state != WorkerState::Stopped {
            self.restarts_since_progress += 1;
        }
        self.state = WorkerState::Idle;
        self.current_job_id = None;
        self.last_seen_at = now_millis;
        self.state_changed_at = now_millis;
        self.started_at = now_millis;
    }

    /// Fold a heartbeat into the record
    pub fn apply(&mut self, heartbeat: &NodeHeartbeat) {
        if self.state != heartbeat.state {
            self.state_changed_at = heartbeat.at;
        }
        self.state = heartbeat.state;
        self.current_job_id = heartbeat.current_job_id.clone();
        self.last_seen_at = heartbeat.at;

        if heartbeat.processed_delta > 0 {
            self.processed_count += heartbeat.processed_delta;
            self.last_progress_at = Some(heartbeat.at);
            self.restarts_since_progress = 0;
            if heartbeat.last_candidate_id.is_some() {
                self.last_candidate_id = heartbeat.last_candidate_id;
            }
        }
    }

    pub fn progress_marker(&self) -> Option<ProgressMarker> {
        match (self.last_candidate_id, self.last_progress_at) {
            (Some(candidate_id), Some(at)) => Some(ProgressMarker { candidate_id, at }),
            _ => None,
        }
    }
}

/// Heartbeat sent by a worker pool to the node registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHeartbeat {
    pub node_id: NodeId,
    pub state: WorkerState,
    pub current_job_id: Option<JobId>,
    pub last_candidate_id: Option<CandidateId>,
    /// IDs processed since the previous heartbeat
    pub processed_delta: u64,
    pub at: i64, // epoch ms
}

/// Freshness-based liveness of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Liveness {
    Active,
    Idle,
    Stalled,
    CrashLooping,
    Down,
    Stopped,
}

impl Liveness {
    /// Needs operator attention
    pub fn is_unhealthy(&self) -> bool {
        matches!(
            self,
            Liveness::Stalled | Liveness::CrashLooping | Liveness::Down
        )
    }
}

impl std::fmt::Display for Liveness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Liveness::Active => "ACTIVE",
            Liveness::Idle => "IDLE",
            Liveness::Stalled => "STALLED",
            Liveness::CrashLooping => "CRASH_LOOPING",
            Liveness::Down => "DOWN",
            Liveness::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}
