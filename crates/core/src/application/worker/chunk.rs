// Chunk scanning - bounded fan-out over one ID range

use super::pacing::PacerSlots;
use super::progress::NodeReporter;
use super::shutdown::ShutdownToken;
use crate::domain::{CandidateId, ChunkRange, ScanOutcome, ScanResult};
use crate::port::{ScanVerdict, Scanner, TimeProvider};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// Result of scanning every ID of a chunk
#[derive(Debug)]
pub enum ScanPass {
    /// Every ID has a terminal outcome
    Complete(Vec<ScanResult>),
    /// Stopped between IDs on an abandon signal
    Abandoned,
    /// A scan task panicked
    Panicked(String),
}

/// Shared inputs of the scan tasks for one chunk
#[derive(Clone)]
pub struct ScanContext {
    pub scanner: Arc<dyn Scanner>,
    pub reporter: Arc<NodeReporter>,
    pub time_provider: Arc<dyn TimeProvider>,
    /// Task `i` paces through slot `i`, so the floor holds across chunks
    pub pacers: PacerSlots,
    pub max_attempts: u32,
}

struct TaskOutput {
    results: Vec<ScanResult>,
    abandoned: bool,
}

/// Scan `range` with at most `concurrency` tasks drawing from a shared cursor
pub async fn scan_range(
    ctx: &ScanContext,
    range: ChunkRange,
    concurrency: usize,
    shutdown: &ShutdownToken,
) -> ScanPass {
    let len = range.len();
    let cursor = Arc::new(AtomicU64::new(0));
    let tasks = (concurrency as u64).min(len).max(1);

    let mut set = JoinSet::new();
    for slot in 0..tasks as usize {
        set.spawn(scan_task(
            ctx.clone(),
            slot,
            range.start(),
            len,
            Arc::clone(&cursor),
            shutdown.clone(),
        ));
    }

    let mut results = Vec::with_capacity(len.min(1 << 16) as usize);
    let mut abandoned = false;
    let mut panicked: Option<String> = None;

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(output) => {
                abandoned |= output.abandoned;
                results.extend(output.results);
            }
            Err(e) if e.is_panic() => {
                error!(range = %range, error = %e, "Scan task panicked");
                if panicked.is_none() {
                    panicked = Some(e.to_string());
                }
                // The chunk cannot complete; stop the siblings
                set.abort_all();
            }
            Err(_) => {} // cancelled by abort_all
        }
    }

    if let Some(message) = panicked {
        return ScanPass::Panicked(message);
    }
    if abandoned {
        return ScanPass::Abandoned;
    }
    ScanPass::Complete(results)
}

async fn scan_task(
    ctx: ScanContext,
    slot: usize,
    start: CandidateId,
    len: u64,
    cursor: Arc<AtomicU64>,
    mut shutdown: ShutdownToken,
) -> TaskOutput {
    let slot = slot % ctx.pacers.len();
    let mut results = Vec::new();

    loop {
        if shutdown.should_abandon() {
            return TaskOutput {
                results,
                abandoned: true,
            };
        }
        let offset = cursor.fetch_add(1, Ordering::Relaxed);
        if offset >= len {
            break;
        }
        let candidate_id = start + offset as i64;

        let result = tokio::select! {
            result = scan_one(&ctx, candidate_id, slot) => result,
            _ = shutdown.wait_abandon() => {
                return TaskOutput { results, abandoned: true };
            }
        };
        ctx.reporter.record_scanned(candidate_id);
        results.push(result);
    }

    TaskOutput {
        results,
        abandoned: false,
    }
}

/// Scan one ID, retrying errors up to `max_attempts`
///
/// Every attempt waits its pacing turn, so retries respect the delay floor too.
async fn scan_one(ctx: &ScanContext, candidate_id: CandidateId, slot: usize) -> ScanResult {
    let mut last_error = String::new();

    for attempt in 1..=ctx.max_attempts {
        ctx.pacers[slot].lock().await.wait_turn().await;
        match ctx.scanner.scan(candidate_id).await {
            Ok(ScanVerdict::Hit { payload }) => {
                debug!(candidate_id, "Hit");
                return ScanResult::new(
                    candidate_id,
                    ScanOutcome::Hit,
                    ctx.time_provider.now_millis(),
                    payload,
                );
            }
            Ok(ScanVerdict::Miss) => {
                return ScanResult::miss(candidate_id, ctx.time_provider.now_millis());
            }
            Err(e) => {
                debug!(candidate_id, attempt, error = %e, "Scan attempt failed");
                last_error = e.to_string();
            }
        }
    }

    warn!(
        candidate_id,
        attempts = ctx.max_attempts,
        error = %last_error,
        "Recording scan error after retries"
    );
    ScanResult::error(candidate_id, ctx.time_provider.now_millis(), last_error)
}
