// Status Monitor - queue depth and per-node liveness

use crate::application::worker::constants::{CRASH_LOOP_RESTART_THRESHOLD, DEFAULT_LIVENESS_WINDOW};
use crate::domain::{JobId, Liveness, NodeId, NodeProgress, ProgressMarker, QueueSnapshot, WorkerState};
use crate::error::Result;
use crate::port::{NodeRegistry, QueueBroker, TimeProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// One row of the worker table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub node_id: NodeId,
    pub liveness: Liveness,
    pub state: WorkerState,
    pub current_job_id: Option<JobId>,
    pub last_progress: Option<ProgressMarker>,
    pub processed_count: u64,
    pub restarts_since_progress: u32,
    pub last_seen_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub queue: QueueSnapshot,
    pub workers: Vec<WorkerStatus>,
}

pub struct StatusMonitor {
    broker: Arc<dyn QueueBroker>,
    registry: Arc<dyn NodeRegistry>,
    time_provider: Arc<dyn TimeProvider>,
    window: Duration,
}

impl StatusMonitor {
    pub fn new(
        broker: Arc<dyn QueueBroker>,
        registry: Arc<dyn NodeRegistry>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            broker,
            registry,
            time_provider,
            window: DEFAULT_LIVENESS_WINDOW,
        }
    }

    /// Override the freshness window
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub async fn status(&self) -> Result<SystemStatus> {
        let queue = self.broker.snapshot().await?;
        let now = self.time_provider.now_millis();
        let window_ms = self.window.as_millis() as i64;

        let workers = self
            .registry
            .list()
            .await?
            .into_iter()
            .map(|node| WorkerStatus {
                liveness: classify(&node, now, window_ms),
                last_progress: node.progress_marker(),
                node_id: node.node_id,
                state: node.state,
                current_job_id: node.current_job_id,
                processed_count: node.processed_count,
                restarts_since_progress: node.restarts_since_progress,
                last_seen_at: node.last_seen_at,
            })
            .collect();

        Ok(SystemStatus { queue, workers })
    }
}

/// Liveness from freshness, not lease state
pub fn classify(node: &NodeProgress, now_millis: i64, window_ms: i64) -> Liveness {
    if node.state == WorkerState::Stopped {
        return Liveness::Stopped;
    }
    if now_millis - node.last_seen_at > window_ms {
        return Liveness::Down;
    }
    if node.restarts_since_progress >= CRASH_LOOP_RESTART_THRESHOLD {
        return Liveness::CrashLooping;
    }
    if node.state.is_busy() {
        let last_change = node
            .last_progress_at
            .unwrap_or(i64::MIN)
            .max(node.state_changed_at);
        if now_millis - last_change > window_ms {
            return Liveness::Stalled;
        }
        return Liveness::Active;
    }
    Liveness::Idle
}
