// Application Layer - Use Cases and Business Logic

pub mod backoff;
pub mod partitioner;
pub mod scan_run;
pub mod status;
pub mod worker;

// Re-exports
pub use backoff::BackoffPolicy;
pub use partitioner::{partition, partition_total, Partition};
pub use scan_run::{EnqueueReport, EnqueueRequest, ScanRunService};
pub use status::{StatusMonitor, SystemStatus, WorkerStatus};
pub use worker::{
    shutdown_channel, ChunkOutcome, NodeReporter, ShutdownSender, ShutdownToken, WorkerPool,
    WorkerPoolConfig,
};
