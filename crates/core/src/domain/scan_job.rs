// Scan Job Domain Model

use serde::{Deserialize, Serialize};

use super::error::{DomainError, Result};

/// Job ID (UUID v4, injected via IdProvider)
pub type JobId = String;

/// One candidate in the scanned ID space
pub type CandidateId = i64;

/// Inclusive, non-empty sub-range of the ID space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkRange {
    start: CandidateId,
    end: CandidateId,
}

impl ChunkRange {
    pub fn new(start: CandidateId, end: CandidateId) -> Result<Self> {
        if start > end {
            return Err(DomainError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> CandidateId {
        self.start
    }

    pub fn end(&self) -> CandidateId {
        self.end
    }

    /// Number of IDs in the range (always >= 1)
    pub fn len(&self) -> u64 {
        self.end.abs_diff(self.start) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, id: CandidateId) -> bool {
        self.start <= id && id <= self.end
    }
}

impl std::fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Scan Job Entity
///
/// Immutable once created; `attempt_count` reflects the broker's delivery
/// counter at receive time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJob {
    pub job_id: JobId,
    pub range: ChunkRange,
    pub enqueued_at: i64, // epoch ms
    pub attempt_count: u32,
}

impl ScanJob {
    /// Create a new job
    ///
    /// # Arguments
    ///
    /// * `job_id` - Unique job ID (injected, not generated)
    /// * `range` - Chunk produced by the partitioner
    /// * `enqueued_at` - Creation timestamp in epoch ms (injected, not system time)
    pub fn new(job_id: impl Into<String>, range: ChunkRange, enqueued_at: i64) -> Self {
        Self {
            job_id: job_id.into(),
            range,
            enqueued_at,
            attempt_count: 0,
        }
    }

    pub fn range_start(&self) -> CandidateId {
        self.range.start()
    }

    pub fn range_end(&self) -> CandidateId {
        self.range.end()
    }
}

/// Handle returned by the broker on enqueue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: JobId,
}

/// Time-bounded right of one worker to process a delivered job
///
/// The token is minted per delivery; a redelivered job carries a new token,
/// so a stale holder cannot ack it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub job_id: JobId,
    pub token: String,
    pub expires_at: i64, // epoch ms
}

/// A delivered job together with its lease
#[derive(Debug, Clone)]
pub struct LeasedJob {
    pub job: ScanJob,
    pub lease: Lease,
}
