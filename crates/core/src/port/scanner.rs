// Scanner Port
// Opaque capability: scan one candidate and report hit / miss, or fail

use crate::domain::CandidateId;
use async_trait::async_trait;
use thiserror::Error;

/// Successful scan of one candidate
#[derive(Debug, Clone, PartialEq)]
pub enum ScanVerdict {
    Hit { payload: Option<serde_json::Value> },
    Miss,
}

/// Per-ID scan failure
///
/// Never fatal to a chunk: retried locally, then recorded as outcome `error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Scan timeout after {0}ms")]
    Timeout(u64),

    #[error("Throttled by target: {0}")]
    Throttled(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Probe failed: {0}")]
    ProbeFailed(String),
}

/// Scanner trait
///
/// Implementations:
/// - HttpScanner: one HTTP request per candidate
/// - CommandScanner: one probe subprocess per candidate
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Scan a single candidate
    async fn scan(&self, candidate_id: CandidateId) -> Result<ScanVerdict, ScanError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Scanner with a scripted answer per candidate
    ///
    /// Unscripted candidates are misses. Tracks call counts, concurrent
    /// in-flight scans and per-candidate request instants.
    #[derive(Default)]
    pub struct ScriptedScanner {
        hits: HashSet<CandidateId>,
        always_fail: HashSet<CandidateId>,
        fail_times: Mutex<HashMap<CandidateId, usize>>,
        panics: HashSet<CandidateId>,
        latency: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: Mutex<Vec<(CandidateId, Instant)>>,
    }

    impl ScriptedScanner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_hits(mut self, ids: impl IntoIterator<Item = CandidateId>) -> Self {
            self.hits.extend(ids);
            self
        }

        /// Fail `times` attempts for `id`, then answer normally
        pub fn with_transient_failures(self, id: CandidateId, times: usize) -> Self {
            self.fail_times.lock().unwrap().insert(id, times);
            self
        }

        pub fn with_permanent_failure(mut self, id: CandidateId) -> Self {
            self.always_fail.insert(id);
            self
        }

        pub fn with_panic(mut self, id: CandidateId) -> Self {
            self.panics.insert(id);
            self
        }

        pub fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn calls_for(&self, id: CandidateId) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(c, _)| *c == id)
                .count()
        }

        /// Request instants in issue order
        pub fn call_instants(&self) -> Vec<(CandidateId, Instant)> {
            self.calls.lock().unwrap().clone()
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Scanner for ScriptedScanner {
        async fn scan(&self, candidate_id: CandidateId) -> Result<ScanVerdict, ScanError> {
            self.calls
                .lock()
                .unwrap()
                .push((candidate_id, Instant::now()));
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.panics.contains(&candidate_id) {
                panic!("scripted panic for candidate {}", candidate_id);
            }
            if self.always_fail.contains(&candidate_id) {
                return Err(ScanError::Transport(format!(
                    "connection refused for {}",
                    candidate_id
                )));
            }
            {
                let mut fail_times = self.fail_times.lock().unwrap();
                if let Some(remaining) = fail_times.get_mut(&candidate_id) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(ScanError::Timeout(1_000));
                    }
                }
            }

            if self.hits.contains(&candidate_id) {
                Ok(ScanVerdict::Hit {
                    payload: Some(serde_json::json!({ "id": candidate_id })),
                })
            } else {
                Ok(ScanVerdict::Miss)
            }
        }
    }
}
