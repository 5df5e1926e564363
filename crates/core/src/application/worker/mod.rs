// Worker Pool - Chunk consumer loop

pub mod chunk;
pub mod constants;
mod heartbeat;
mod pacing;
mod progress;
mod shutdown;

use constants::*;
pub use chunk::{ScanContext, ScanPass};
pub use heartbeat::LeaseHeartbeat;
pub use pacing::{pacer_slots, Pacer, PacerSlots};
pub use progress::NodeReporter;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken, StopSignal};

use crate::application::backoff::BackoffPolicy;
use crate::domain::{Lease, LeasedJob, ScanOutcome, WorkerState};
use crate::error::{AppError, Result};
use crate::port::{QueueBroker, ResultSink, Scanner, TimeProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

/// Worker pool knobs
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Concurrent scan tasks per chunk
    pub concurrency: usize,
    /// Minimum gap between the starts of successive requests of one task
    pub delay: Duration,
    pub receive_batch: usize,
    pub receive_wait: Duration,
    pub heartbeat_interval: Duration,
    /// Added to the lease deadline on every heartbeat
    pub lease_extension: Duration,
    pub max_scan_attempts: u32,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            delay: Duration::ZERO,
            receive_batch: DEFAULT_RECEIVE_BATCH,
            receive_wait: DEFAULT_RECEIVE_WAIT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            lease_extension: DEFAULT_VISIBILITY_TIMEOUT,
            max_scan_attempts: MAX_SCAN_ATTEMPTS,
        }
    }
}

impl WorkerPoolConfig {
    /// # Errors
    /// - AppError::InvalidConfig if a knob is out of range
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(AppError::InvalidConfig(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if self.receive_batch == 0 {
            return Err(AppError::InvalidConfig(
                "receive batch must be greater than 0".to_string(),
            ));
        }
        if self.max_scan_attempts == 0 {
            return Err(AppError::InvalidConfig(
                "max scan attempts must be greater than 0".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(AppError::InvalidConfig(
                "heartbeat interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// How one chunk ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Results persisted (and ack attempted)
    Completed { scanned: usize, hits: usize },
    /// Stopped on abandon; lease released
    Abandoned,
    /// Could not complete; lease left to expire
    Failed(String),
}

/// Consumes scan jobs until stopped
pub struct WorkerPool {
    config: WorkerPoolConfig,
    broker: Arc<dyn QueueBroker>,
    sink: Arc<dyn ResultSink>,
    scanner: Arc<dyn Scanner>,
    reporter: Arc<NodeReporter>,
    time_provider: Arc<dyn TimeProvider>,
    pacers: PacerSlots,
    ack_backoff: BackoffPolicy,
    receive_backoff: BackoffPolicy,
}

impl WorkerPool {
    /// # Errors
    /// - AppError::InvalidConfig before any work starts
    pub fn new(
        config: WorkerPoolConfig,
        broker: Arc<dyn QueueBroker>,
        sink: Arc<dyn ResultSink>,
        scanner: Arc<dyn Scanner>,
        reporter: Arc<NodeReporter>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            pacers: pacer_slots(config.delay, config.concurrency),
            config,
            broker,
            sink,
            scanner,
            reporter,
            time_provider,
            ack_backoff: BackoffPolicy::new(
                ERROR_RECOVERY_BASE_DELAY,
                2.0,
                ERROR_RECOVERY_MAX_DELAY,
                ACK_MAX_ATTEMPTS,
            ),
            receive_backoff: BackoffPolicy::new(
                ERROR_RECOVERY_BASE_DELAY,
                2.0,
                ERROR_RECOVERY_MAX_DELAY,
                u32::MAX,
            ),
        })
    }

    pub fn with_ack_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.ack_backoff = backoff;
        self
    }

    pub fn with_receive_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.receive_backoff = backoff;
        self
    }

    /// Current worker state
    pub fn state(&self) -> WorkerState {
        self.reporter.state()
    }

    /// Run the receive loop until the shutdown token fires
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        let node_id = self.reporter.node_id().to_string();
        if let Err(e) = self.reporter.register().await {
            warn!(node_id = %node_id, error = %e, "Failed to register node");
        }
        info!(
            node_id = %node_id,
            concurrency = self.config.concurrency,
            delay_ms = self.config.delay.as_millis() as u64,
            "Worker pool started"
        );

        let mut receive_failures: u32 = 0;
        loop {
            if shutdown.is_shutdown() {
                break;
            }

            self.reporter.transition(WorkerState::Receiving).await?;
            let received = tokio::select! {
                received = self.broker.receive(self.config.receive_batch, self.config.receive_wait) => received,
                _ = shutdown.wait() => {
                    self.reporter.transition(WorkerState::Idle).await?;
                    info!("Worker interrupted during receive");
                    break;
                }
            };

            match received {
                Ok(jobs) if jobs.is_empty() => {
                    receive_failures = 0;
                    self.reporter.transition(WorkerState::Idle).await?;
                }
                Ok(jobs) => {
                    receive_failures = 0;
                    let mut jobs = jobs.into_iter();
                    while let Some(leased) = jobs.next() {
                        if shutdown.is_shutdown() {
                            // Hand unstarted chunks straight back
                            self.release(&leased.lease).await;
                            for rest in jobs.by_ref() {
                                self.release(&rest.lease).await;
                            }
                            break;
                        }
                        self.process_chunk(leased, &shutdown).await?;
                    }
                    if self.reporter.state() == WorkerState::Receiving {
                        self.reporter.transition(WorkerState::Idle).await?;
                    }
                }
                Err(e) => {
                    self.reporter.transition(WorkerState::Idle).await?;
                    receive_failures = receive_failures.saturating_add(1);
                    let delay = self.receive_backoff.delay_for(receive_failures);
                    error!(
                        error = %e,
                        failures = receive_failures,
                        delay_ms = delay.as_millis() as u64,
                        "Receive failed"
                    );
                    tokio::select! {
                        _ = sleep(delay) => {},
                        _ = shutdown.wait() => {
                            info!("Worker interrupted during error recovery");
                            break;
                        }
                    }
                }
            }
        }

        self.reporter.transition(WorkerState::Terminating).await?;
        self.reporter.transition(WorkerState::Stopped).await?;
        info!(node_id = %node_id, "Worker pool stopped");
        Ok(())
    }

    /// Scan, persist and ack one leased chunk
    pub async fn process_chunk(
        &self,
        leased: LeasedJob,
        shutdown: &ShutdownToken,
    ) -> Result<ChunkOutcome> {
        let LeasedJob { job, lease } = leased;
        self.reporter.set_job(&job.job_id);
        self.reporter.transition(WorkerState::Scanning).await?;
        info!(
            job_id = %job.job_id,
            range = %job.range,
            attempt = job.attempt_count,
            "Processing chunk"
        );

        let heartbeat = LeaseHeartbeat::start(
            Arc::clone(&self.broker),
            Arc::clone(&self.reporter),
            lease.clone(),
            self.config.heartbeat_interval,
            self.config.lease_extension,
        );

        let ctx = ScanContext {
            scanner: Arc::clone(&self.scanner),
            reporter: Arc::clone(&self.reporter),
            time_provider: Arc::clone(&self.time_provider),
            pacers: Arc::clone(&self.pacers),
            max_attempts: self.config.max_scan_attempts,
        };
        let results = match chunk::scan_range(&ctx, job.range, self.config.concurrency, shutdown)
            .await
        {
            ScanPass::Complete(results) => results,
            ScanPass::Abandoned => {
                drop(heartbeat);
                warn!(job_id = %job.job_id, "Chunk abandoned, releasing lease");
                self.release(&lease).await;
                self.reporter.transition(WorkerState::Idle).await?;
                return Ok(ChunkOutcome::Abandoned);
            }
            ScanPass::Panicked(message) => {
                drop(heartbeat);
                return self.fail_chunk(&job.job_id, message).await;
            }
        };

        // Persist is never interrupted by a stop signal
        self.reporter.transition(WorkerState::Persisting).await?;
        if let Err(e) = self.sink.upsert(&results).await {
            drop(heartbeat);
            return self
                .fail_chunk(&job.job_id, format!("persist failed: {}", e))
                .await;
        }
        drop(heartbeat);

        self.reporter.transition(WorkerState::Acking).await?;
        self.ack(&lease).await;
        self.reporter.transition(WorkerState::Idle).await?;

        let hits = results
            .iter()
            .filter(|r| r.outcome == ScanOutcome::Hit)
            .count();
        info!(
            job_id = %job.job_id,
            scanned = results.len(),
            hits,
            "Chunk completed"
        );
        Ok(ChunkOutcome::Completed {
            scanned: results.len(),
            hits,
        })
    }

    /// Leave the lease to expire so the chunk is redelivered
    async fn fail_chunk(&self, job_id: &str, message: String) -> Result<ChunkOutcome> {
        self.reporter.transition(WorkerState::Error).await?;
        error!(job_id = %job_id, error = %message, "Chunk failed, lease left to expire");
        self.reporter.transition(WorkerState::Idle).await?;
        Ok(ChunkOutcome::Failed(message))
    }

    async fn ack(&self, lease: &Lease) {
        match self
            .ack_backoff
            .retry("ack", || self.broker.ack(lease))
            .await
        {
            Ok(()) => {}
            Err(AppError::LeaseExpired(message)) => {
                // Results are durable; the redelivered copy rewrites the same rows
                warn!(job_id = %lease.job_id, reason = %message, "Lease expired before ack");
            }
            Err(e) => {
                error!(job_id = %lease.job_id, error = %e, "Ack failed, chunk will be redelivered");
            }
        }
    }

    async fn release(&self, lease: &Lease) {
        if let Err(e) = self.broker.release(lease).await {
            warn!(job_id = %lease.job_id, error = %e, "Failed to release lease");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChunkRange, ScanJob};
    use crate::port::node_registry::mocks::InMemoryNodeRegistry;
    use crate::port::queue_broker::mocks::InMemoryQueueBroker;
    use crate::port::result_sink::mocks::InMemoryResultSink;
    use crate::port::scanner::mocks::ScriptedScanner;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use crate::port::ResultSink;

    struct Harness {
        clock: Arc<ManualTimeProvider>,
        broker: Arc<InMemoryQueueBroker>,
        sink: Arc<InMemoryResultSink>,
        registry: Arc<InMemoryNodeRegistry>,
    }

    impl Harness {
        fn new() -> Self {
            let clock = Arc::new(ManualTimeProvider::new(1_000));
            Self {
                broker: Arc::new(InMemoryQueueBroker::new(
                    clock.clone(),
                    Duration::from_secs(900),
                )),
                sink: Arc::new(InMemoryResultSink::new()),
                registry: Arc::new(InMemoryNodeRegistry::new()),
                clock,
            }
        }

        fn pool(&self, node_id: &str, scanner: Arc<ScriptedScanner>, concurrency: usize) -> WorkerPool {
            let config = WorkerPoolConfig {
                concurrency,
                receive_wait: Duration::from_millis(20),
                ..WorkerPoolConfig::default()
            };
            let fast = BackoffPolicy::new(Duration::from_millis(1), 2.0, Duration::from_millis(5), 3);
            WorkerPool::new(
                config,
                self.broker.clone(),
                self.sink.clone(),
                scanner,
                Arc::new(NodeReporter::new(
                    node_id,
                    self.registry.clone(),
                    self.clock.clone(),
                )),
                self.clock.clone(),
            )
            .unwrap()
            .with_ack_backoff(fast.clone())
            .with_receive_backoff(fast)
        }

        async fn enqueue(&self, id: &str, start: i64, end: i64) {
            self.broker
                .enqueue(&ScanJob::new(id, ChunkRange::new(start, end).unwrap(), 0))
                .await
                .unwrap();
        }

        async fn lease_one(&self) -> LeasedJob {
            self.broker
                .receive(1, Duration::from_millis(20))
                .await
                .unwrap()
                .remove(0)
        }
    }

    #[test]
    fn test_zero_concurrency_is_invalid_config() {
        let h = Harness::new();
        let result = WorkerPool::new(
            WorkerPoolConfig {
                concurrency: 0,
                ..WorkerPoolConfig::default()
            },
            h.broker.clone(),
            h.sink.clone(),
            Arc::new(ScriptedScanner::new()),
            Arc::new(NodeReporter::new("n", h.registry.clone(), h.clock.clone())),
            h.clock.clone(),
        );
        assert!(matches!(result, Err(AppError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_chunk_is_persisted_then_acked() {
        let h = Harness::new();
        let scanner = Arc::new(ScriptedScanner::new().with_hits([42]));
        let pool = h.pool("node-a", scanner, 4);
        h.enqueue("job-1", 1, 100).await;

        let outcome = pool
            .process_chunk(h.lease_one().await, &shutdown_channel().1)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ChunkOutcome::Completed {
                scanned: 100,
                hits: 1
            }
        );
        assert_eq!(h.sink.row_count(), 100);
        assert_eq!(h.sink.upsert_calls(), 1);
        assert_eq!(h.broker.acked(), vec!["job-1".to_string()]);
        assert_eq!(pool.state(), WorkerState::Idle);
        let hit = h.sink.get(42).await.unwrap().unwrap();
        assert_eq!(hit.outcome, ScanOutcome::Hit);
    }

    #[tokio::test]
    async fn test_concurrency_bounds_in_flight_scans() {
        let h = Harness::new();
        let scanner = Arc::new(ScriptedScanner::new().with_latency(Duration::from_millis(2)));
        let pool = h.pool("node-a", scanner.clone(), 3);
        h.enqueue("job-1", 1, 30).await;

        pool.process_chunk(h.lease_one().await, &shutdown_channel().1)
            .await
            .unwrap();

        assert!(scanner.max_in_flight() <= 3);
        assert!(scanner.max_in_flight() >= 2);
        assert_eq!(scanner.call_count(), 30);
    }

    #[tokio::test]
    async fn test_pool_paces_across_chunk_boundaries() {
        let h = Harness::new();
        let delay = Duration::from_millis(15);
        let scanner = Arc::new(ScriptedScanner::new());
        let config = WorkerPoolConfig {
            concurrency: 1,
            delay,
            ..WorkerPoolConfig::default()
        };
        let pool = WorkerPool::new(
            config,
            h.broker.clone(),
            h.sink.clone(),
            scanner.clone(),
            Arc::new(NodeReporter::new("node-a", h.registry.clone(), h.clock.clone())),
            h.clock.clone(),
        )
        .unwrap();
        h.enqueue("job-1", 1, 2).await;
        h.enqueue("job-2", 3, 4).await;

        for _ in 0..2 {
            pool.process_chunk(h.lease_one().await, &shutdown_channel().1)
                .await
                .unwrap();
        }

        let instants: Vec<_> = scanner.call_instants().into_iter().map(|(_, at)| at).collect();
        assert_eq!(instants.len(), 4);
        for pair in instants.windows(2) {
            assert!(pair[1] - pair[0] >= delay);
        }
    }

    #[tokio::test]
    async fn test_sink_failure_leaves_job_for_redelivery() {
        let h = Harness::new();
        let scanner = Arc::new(ScriptedScanner::new().with_hits([5]));
        let pool = h.pool("node-a", scanner, 2);
        h.enqueue("job-1", 1, 10).await;
        h.sink.set_unavailable(true);

        let outcome = pool
            .process_chunk(h.lease_one().await, &shutdown_channel().1)
            .await
            .unwrap();
        assert!(matches!(outcome, ChunkOutcome::Failed(_)));
        assert!(h.broker.acked().is_empty());
        assert_eq!(pool.state(), WorkerState::Idle);

        // Lease expires, the chunk comes back and now persists
        h.sink.set_unavailable(false);
        h.clock.advance(900_000);
        let again = h.lease_one().await;
        assert_eq!(again.job.attempt_count, 2);
        pool.process_chunk(again, &shutdown_channel().1)
            .await
            .unwrap();
        assert_eq!(h.sink.row_count(), 10);
        assert_eq!(h.broker.acked(), vec!["job-1".to_string()]);
    }

    #[tokio::test]
    async fn test_redelivered_chunk_does_not_duplicate_rows() {
        let h = Harness::new();
        let first = h.pool("node-a", Arc::new(ScriptedScanner::new().with_hits([42])), 2);
        let second = h.pool("node-b", Arc::new(ScriptedScanner::new().with_hits([42])), 2);
        h.enqueue("job-1", 40, 45).await;

        // node-a finishes but its lease already expired
        let stale = h.lease_one().await;
        h.clock.advance(900_000);
        let fresh = h.lease_one().await;

        let (_tx, token) = shutdown_channel();
        first.process_chunk(stale, &token).await.unwrap();
        second.process_chunk(fresh, &token).await.unwrap();

        assert_eq!(h.sink.row_count(), 6);
        let row = h.sink.get(42).await.unwrap().unwrap();
        assert_eq!(row.outcome, ScanOutcome::Hit);
        assert_eq!(row.write_count, 2);
        assert_eq!(h.broker.acked(), vec!["job-1".to_string()]);
    }

    #[tokio::test]
    async fn test_ack_retries_transient_failures() {
        let h = Harness::new();
        let pool = h.pool("node-a", Arc::new(ScriptedScanner::new()), 1);
        h.enqueue("job-1", 1, 3).await;
        h.broker.fail_next_acks(2);

        pool.process_chunk(h.lease_one().await, &shutdown_channel().1)
            .await
            .unwrap();
        assert_eq!(h.broker.acked(), vec!["job-1".to_string()]);
    }

    #[tokio::test]
    async fn test_abandon_releases_lease_and_discards_results() {
        let h = Harness::new();
        let pool = h.pool("node-a", Arc::new(ScriptedScanner::new()), 2);
        h.enqueue("job-1", 1, 50).await;
        let leased = h.lease_one().await;

        let (tx, token) = shutdown_channel();
        tx.abandon();
        let outcome = pool.process_chunk(leased, &token).await.unwrap();

        assert_eq!(outcome, ChunkOutcome::Abandoned);
        assert_eq!(h.sink.upsert_calls(), 0);
        assert!(h.broker.acked().is_empty());
        // Released: immediately visible again
        assert_eq!(h.lease_one().await.job.job_id, "job-1");
    }

    #[tokio::test]
    async fn test_panicking_scanner_fails_chunk_without_ack() {
        let h = Harness::new();
        let pool = h.pool("node-a", Arc::new(ScriptedScanner::new().with_panic(3)), 2);
        h.enqueue("job-1", 1, 5).await;

        let outcome = pool
            .process_chunk(h.lease_one().await, &shutdown_channel().1)
            .await
            .unwrap();
        assert!(matches!(outcome, ChunkOutcome::Failed(_)));
        assert_eq!(h.sink.upsert_calls(), 0);
        assert!(h.broker.acked().is_empty());
    }

    #[tokio::test]
    async fn test_run_drains_queue_and_stops_cleanly() {
        let h = Harness::new();
        let scanner = Arc::new(ScriptedScanner::new().with_hits([7, 77]));
        let pool = Arc::new(h.pool("node-a", scanner, 4));
        h.enqueue("job-1", 1, 50).await;
        h.enqueue("job-2", 51, 100).await;
        h.broker.fail_next_receives(1);

        let (tx, token) = shutdown_channel();
        let runner = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run(token).await })
        };

        for _ in 0..200 {
            if h.broker.is_empty() {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        tx.shutdown();
        tokio_test::assert_ok!(runner.await.unwrap());

        assert!(h.broker.is_empty());
        assert_eq!(h.sink.row_count(), 100);
        assert_eq!(pool.state(), WorkerState::Stopped);

        let node = h.registry.get("node-a").unwrap();
        assert_eq!(node.state, WorkerState::Stopped);
        assert_eq!(node.processed_count, 100);
        assert_eq!(node.last_candidate_id.map(|id| id > 0), Some(true));
    }
}
