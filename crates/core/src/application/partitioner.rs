// Range Partitioner
// Pure and deterministic: re-running it after a crash yields the same chunks

use crate::domain::{CandidateId, ChunkRange};
use crate::error::{AppError, Result};

/// Lazy iterator over the chunks of `[start, end]`
#[derive(Debug, Clone)]
pub struct Partition {
    next_start: Option<CandidateId>,
    end: CandidateId,
    chunk_size: i64,
    remaining: usize,
}

impl Iterator for Partition {
    type Item = ChunkRange;

    fn next(&mut self) -> Option<ChunkRange> {
        let start = self.next_start?;
        let chunk_end = start
            .checked_add(self.chunk_size - 1)
            .map_or(self.end, |e| e.min(self.end));

        self.next_start = if chunk_end >= self.end {
            None
        } else {
            Some(chunk_end + 1)
        };
        self.remaining -= 1;

        ChunkRange::new(start, chunk_end).ok()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Partition {}

/// Split `[start_id, end_id]` into `chunk_size` chunks; the last one absorbs
/// the remainder
///
/// # Errors
/// - AppError::InvalidConfig if `chunk_size <= 0`, `start_id <= 0` or
///   `start_id > end_id`
pub fn partition(start_id: CandidateId, end_id: CandidateId, chunk_size: i64) -> Result<Partition> {
    if chunk_size <= 0 {
        return Err(AppError::InvalidConfig(format!(
            "chunk_size must be positive, got {}",
            chunk_size
        )));
    }
    if start_id <= 0 {
        return Err(AppError::InvalidConfig(format!(
            "start_id must be positive, got {}",
            start_id
        )));
    }
    if start_id > end_id {
        return Err(AppError::InvalidConfig(format!(
            "start_id {} is greater than end_id {}",
            start_id, end_id
        )));
    }

    // Both operands are positive, so the span fits in u64
    let span = end_id.abs_diff(start_id) + 1;
    let chunks = span.div_ceil(chunk_size as u64);

    Ok(Partition {
        next_start: Some(start_id),
        end: end_id,
        chunk_size,
        remaining: chunks as usize,
    })
}

/// Split `[1, total_ids]` into `chunk_size` chunks
///
/// # Errors
/// - AppError::InvalidConfig if `total_ids <= 0` or `chunk_size <= 0`
pub fn partition_total(total_ids: i64, chunk_size: i64) -> Result<Partition> {
    if total_ids <= 0 {
        return Err(AppError::InvalidConfig(format!(
            "total_ids must be positive, got {}",
            total_ids
        )));
    }
    partition(1, total_ids, chunk_size)
}
