//! Shared fixtures: a temp SQLite database wired to real adapters

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rangescan_core::application::{
    BackoffPolicy, EnqueueRequest, NodeReporter, ScanRunService, WorkerPool, WorkerPoolConfig,
};
use rangescan_core::domain::QueueSnapshot;
use rangescan_core::port::id_provider::UuidProvider;
use rangescan_core::port::time_provider::SystemTimeProvider;
use rangescan_core::port::{QueueBroker, Scanner, TimeProvider};
use rangescan_infra_sqlite::{
    open_database, SqliteNodeRegistry, SqlitePool, SqliteQueueBroker, SqliteResultSink,
};
use tempfile::TempDir;

pub struct Fleet {
    _dir: TempDir,
    pub pool: SqlitePool,
    pub clock: Arc<dyn TimeProvider>,
    pub broker: Arc<SqliteQueueBroker>,
    pub sink: Arc<SqliteResultSink>,
    pub registry: Arc<SqliteNodeRegistry>,
}

impl Fleet {
    pub async fn new(visibility_timeout: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.db");
        let pool = open_database(path.to_str().unwrap()).await.unwrap();
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);

        Self {
            broker: Arc::new(
                SqliteQueueBroker::new(
                    pool.clone(),
                    clock.clone(),
                    Arc::new(UuidProvider),
                    visibility_timeout,
                )
                .with_poll_interval(Duration::from_millis(10)),
            ),
            sink: Arc::new(SqliteResultSink::new(pool.clone())),
            registry: Arc::new(SqliteNodeRegistry::new(pool.clone())),
            clock,
            pool,
            _dir: dir,
        }
    }

    pub async fn enqueue(&self, start_id: i64, end_id: i64, chunk_size: i64) -> usize {
        let service = ScanRunService::new(
            self.broker.clone(),
            Arc::new(UuidProvider),
            self.clock.clone(),
        );
        service
            .enqueue(EnqueueRequest {
                start_id,
                end_id,
                chunk_size,
            })
            .await
            .unwrap()
            .jobs_enqueued
    }

    pub fn worker(&self, node_id: &str, scanner: Arc<dyn Scanner>, config: WorkerPoolConfig) -> WorkerPool {
        let fast = BackoffPolicy::new(Duration::from_millis(5), 2.0, Duration::from_millis(50), 5);
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

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.broker.snapshot().await.unwrap()
    }

    /// Poll until nothing is waiting or in flight
    pub async fn wait_until_drained(&self, deadline: Duration) {
        let start = tokio::time::Instant::now();
        while self.snapshot().await.total() > 0 {
            assert!(start.elapsed() < deadline, "queue did not drain in {:?}", deadline);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Worker config tuned for tests: short receive waits
pub fn test_config(concurrency: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        concurrency,
        receive_wait: Duration::from_millis(50),
        ..WorkerPoolConfig::default()
    }
}
