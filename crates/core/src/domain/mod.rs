// Domain Layer - Pure business logic and entities

pub mod error;
pub mod node;
pub mod queue;
pub mod scan_job;
pub mod scan_result;

// Re-exports
pub use error::DomainError;
pub use node::{
    Liveness, NodeHeartbeat, NodeId, NodeProgress, ProgressMarker, WorkerState,
};
pub use queue::QueueSnapshot;
pub use scan_job::{CandidateId, ChunkRange, JobHandle, JobId, Lease, LeasedJob, ScanJob};
pub use scan_result::{ScanOutcome, ScanResult, StoredResult};
