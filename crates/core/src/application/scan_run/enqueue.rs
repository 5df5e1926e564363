// Enqueue Use Case

use crate::application::backoff::BackoffPolicy;
use crate::application::partitioner::partition;
use crate::domain::{CandidateId, ChunkRange, ScanJob};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, QueueBroker, TimeProvider};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Enqueue request: the inclusive ID space and the chunk size
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub start_id: CandidateId,
    pub end_id: CandidateId,
    pub chunk_size: i64,
}

/// What an enqueue call put on the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueReport {
    pub jobs_enqueued: usize,
    pub first_range: Option<ChunkRange>,
    pub last_range: Option<ChunkRange>,
    pub job_ids: Vec<String>,
}

/// Execute enqueue use case
///
/// Partitions the request and enqueues each chunk, retrying transient broker
/// failures with backoff. Re-running after a partial failure is safe: the
/// partition is deterministic and the result sink converges on duplicates.
///
/// # Arguments
///
/// * `broker` - Queue broker
/// * `id_provider` - ID generator (injected for determinism)
/// * `time_provider` - Time provider (injected for determinism)
/// * `backoff` - Retry policy for transient broker errors
/// * `req` - Enqueue request
pub async fn execute(
    broker: &dyn QueueBroker,
    id_provider: &dyn IdProvider,
    time_provider: &dyn TimeProvider,
    backoff: &BackoffPolicy,
    req: EnqueueRequest,
) -> Result<EnqueueReport> {
    // Validate everything before the first enqueue
    let chunks = partition(req.start_id, req.end_id, req.chunk_size)?;
    let total = chunks.len();

    info!(
        start_id = req.start_id,
        end_id = req.end_id,
        chunk_size = req.chunk_size,
        jobs = total,
        "Enqueueing partition"
    );

    let mut report = EnqueueReport {
        jobs_enqueued: 0,
        first_range: None,
        last_range: None,
        job_ids: Vec::with_capacity(total),
    };

    for range in chunks {
        let job = ScanJob::new(id_provider.generate_id(), range, time_provider.now_millis());

        let handle = backoff
            .retry("enqueue", || broker.enqueue(&job))
            .await
            .map_err(|e| match e {
                AppError::TransientBroker(msg) => AppError::TransientBroker(format!(
                    "enqueued {} of {} jobs before failure: {}",
                    report.jobs_enqueued, total, msg
                )),
                other => other,
            })?;

        debug!(job_id = %handle.job_id, range = %range, "Job enqueued");

        report.first_range.get_or_insert(range);
        report.last_range = Some(range);
        report.job_ids.push(handle.job_id);
        report.jobs_enqueued += 1;
    }

    info!(jobs_enqueued = report.jobs_enqueued, "Enqueue complete");
    Ok(report)
}
