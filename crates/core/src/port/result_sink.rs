// Result Sink Port (Interface)

use crate::domain::{CandidateId, ScanOutcome, ScanResult, StoredResult};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Idempotent persistence of scan results, keyed by `candidate_id`
///
/// Conflict rule for repeated candidates:
/// - `outcome` / `payload`: last write wins by scan timestamp, ties go to the
///   later write
/// - `discovered_at`: first write wins
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Insert-or-update a batch atomically
    ///
    /// Safe to repeat with overlapping or identical candidates.
    ///
    /// # Errors
    /// - AppError::StorageUnavailable on connectivity loss (caller must not ack)
    async fn upsert(&self, results: &[ScanResult]) -> Result<()>;

    /// Stored row for one candidate
    async fn get(&self, candidate_id: CandidateId) -> Result<Option<StoredResult>>;

    /// Row counts per outcome (outcomes with no rows are omitted)
    async fn count_by_outcome(&self) -> Result<BTreeMap<String, u64>>;

    /// Rows with the given outcome, ascending by candidate
    async fn list_by_outcome(&self, outcome: ScanOutcome, limit: u32) -> Result<Vec<StoredResult>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory sink with the same conflict rule as the SQL adapters
    #[derive(Default)]
    pub struct InMemoryResultSink {
        rows: Mutex<BTreeMap<CandidateId, StoredResult>>,
        unavailable: AtomicBool,
        upsert_calls: AtomicUsize,
    }

    impl InMemoryResultSink {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every following upsert fail with StorageUnavailable
        pub fn set_unavailable(&self, unavailable: bool) {
            self.unavailable.store(unavailable, Ordering::SeqCst);
        }

        pub fn upsert_calls(&self) -> usize {
            self.upsert_calls.load(Ordering::SeqCst)
        }

        pub fn row_count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }

        pub fn rows(&self) -> Vec<StoredResult> {
            self.rows.lock().unwrap().values().cloned().collect()
        }
    }

    #[async_trait]
    impl ResultSink for InMemoryResultSink {
        async fn upsert(&self, results: &[ScanResult]) -> Result<()> {
            self.upsert_calls.fetch_add(1, Ordering::SeqCst);
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AppError::StorageUnavailable("result store offline".into()));
            }

            let mut rows = self.rows.lock().unwrap();
            for result in results {
                rows.entry(result.candidate_id)
                    .and_modify(|stored| stored.merge(result))
                    .or_insert_with(|| StoredResult::from_first(result));
            }
            Ok(())
        }

        async fn get(&self, candidate_id: CandidateId) -> Result<Option<StoredResult>> {
            Ok(self.rows.lock().unwrap().get(&candidate_id).cloned())
        }

        async fn count_by_outcome(&self) -> Result<BTreeMap<String, u64>> {
            let mut counts = BTreeMap::new();
            for row in self.rows.lock().unwrap().values() {
                *counts.entry(row.outcome.to_string()).or_insert(0) += 1;
            }
            Ok(counts)
        }

        async fn list_by_outcome(
            &self,
            outcome: ScanOutcome,
            limit: u32,
        ) -> Result<Vec<StoredResult>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|row| row.outcome == outcome)
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }
}
