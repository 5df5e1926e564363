// Node progress reporting

use crate::domain::{CandidateId, JobId, NodeHeartbeat, NodeId, WorkerState};
use crate::error::Result;
use crate::port::{NodeRegistry, TimeProvider};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const NO_CANDIDATE: i64 = i64::MIN;

struct Current {
    state: WorkerState,
    job_id: Option<JobId>,
}

/// Tracks this node's state and progress and pushes it to the registry
///
/// Scan tasks only touch the atomics. Registry failures are logged and the
/// pending delta is kept for the next flush, so reporting never stops work.
pub struct NodeReporter {
    node_id: NodeId,
    registry: Arc<dyn NodeRegistry>,
    time_provider: Arc<dyn TimeProvider>,
    current: Mutex<Current>,
    pending: AtomicU64,
    last_candidate: AtomicI64,
}

impl NodeReporter {
    pub fn new(
        node_id: impl Into<NodeId>,
        registry: Arc<dyn NodeRegistry>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            registry,
            time_provider,
            current: Mutex::new(Current {
                state: WorkerState::Idle,
                job_id: None,
            }),
            pending: AtomicU64::new(0),
            last_candidate: AtomicI64::new(NO_CANDIDATE),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Register (or re-register) this node
    pub async fn register(&self) -> Result<()> {
        self.registry
            .register(&self.node_id, self.time_provider.now_millis())
            .await
    }

    pub fn state(&self) -> WorkerState {
        self.lock_current().state
    }

    /// Move to `next` and publish it
    ///
    /// # Errors
    /// - DomainError::InvalidStateTransition if the move is not allowed
    pub async fn transition(&self, next: WorkerState) -> Result<()> {
        {
            let mut current = self.lock_current();
            current.state = current.state.transition(next)?;
            if !next.is_busy() {
                current.job_id = None;
            }
        }
        self.flush().await;
        Ok(())
    }

    /// Record the chunk being worked on
    pub fn set_job(&self, job_id: &str) {
        self.lock_current().job_id = Some(job_id.to_string());
    }

    /// Count one finished candidate
    pub fn record_scanned(&self, candidate_id: CandidateId) {
        self.pending.fetch_add(1, Ordering::Relaxed);
        self.last_candidate.store(candidate_id, Ordering::Relaxed);
    }

    /// Push state and pending progress to the registry (best effort)
    pub async fn flush(&self) {
        let heartbeat = self.snapshot();
        let delta = heartbeat.processed_delta;
        if let Err(e) = self.registry.heartbeat(&heartbeat).await {
            // Keep the delta for the next attempt
            self.pending.fetch_add(delta, Ordering::Relaxed);
            warn!(node_id = %self.node_id, error = %e, "Failed to report node progress");
        } else {
            debug!(
                node_id = %self.node_id,
                state = %heartbeat.state,
                processed_delta = delta,
                "Reported node progress"
            );
        }
    }

    fn snapshot(&self) -> NodeHeartbeat {
        let (state, current_job_id) = {
            let current = self.lock_current();
            (current.state, current.job_id.clone())
        };
        let last = self.last_candidate.load(Ordering::Relaxed);
        NodeHeartbeat {
            node_id: self.node_id.clone(),
            state,
            current_job_id,
            last_candidate_id: (last != NO_CANDIDATE).then_some(last),
            processed_delta: self.pending.swap(0, Ordering::Relaxed),
            at: self.time_provider.now_millis(),
        }
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, Current> {
        // A poisoned lock only means a panic elsewhere; the data is still usable
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
