// SQLite QueueBroker Implementation
// The shared database file plays the managed queue: visibility is a timestamp
// column and a lease is the (job_id, lease_token) pair.

use crate::error::broker_error;
use async_trait::async_trait;
use rangescan_core::domain::{ChunkRange, JobHandle, Lease, LeasedJob, QueueSnapshot, ScanJob};
use rangescan_core::error::{AppError, Result};
use rangescan_core::port::{IdProvider, QueueBroker, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Polling step while long-polling an empty queue
const RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct SqliteQueueBroker {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
    id_provider: Arc<dyn IdProvider>,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl SqliteQueueBroker {
    pub fn new(
        pool: SqlitePool,
        time_provider: Arc<dyn TimeProvider>,
        id_provider: Arc<dyn IdProvider>,
        visibility_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            time_provider,
            id_provider,
            visibility_timeout,
            poll_interval: RECEIVE_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Atomically lease up to `max_batch` visible jobs
    async fn try_claim(&self, max_batch: usize) -> Result<Vec<LeasedJob>> {
        let now = self.time_provider.now_millis();
        let expires_at = now + self.visibility_timeout.as_millis() as i64;
        let token = self.id_provider.generate_id();

        // Single statement: SQLite's write lock makes select-and-lease atomic
        let rows = sqlx::query_as::<_, ScanJobRow>(
            r#"
            UPDATE scan_jobs
            SET visible_at = ?, lease_token = ?, attempt_count = attempt_count + 1
            WHERE job_id IN (
                SELECT job_id FROM scan_jobs
                WHERE visible_at <= ?
                ORDER BY enqueued_at ASC, rowid ASC
                LIMIT ?
            )
            RETURNING *
            "#,
        )
        .bind(expires_at)
        .bind(&token)
        .bind(now)
        .bind(max_batch as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(broker_error)?;

        rows.into_iter()
            .map(|row| {
                let job = row.into_job()?;
                Ok(LeasedJob {
                    lease: Lease {
                        job_id: job.job_id.clone(),
                        token: token.clone(),
                        expires_at,
                    },
                    job,
                })
            })
            .collect()
    }
}

#[async_trait]
impl QueueBroker for SqliteQueueBroker {
    async fn enqueue(&self, job: &ScanJob) -> Result<JobHandle> {
        sqlx::query(
            r#"
            INSERT INTO scan_jobs (
                job_id, range_start, range_end, enqueued_at, attempt_count, visible_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.job_id)
        .bind(job.range_start())
        .bind(job.range_end())
        .bind(job.enqueued_at)
        .bind(job.attempt_count as i64)
        .bind(self.time_provider.now_millis())
        .execute(&self.pool)
        .await
        .map_err(broker_error)?;

        Ok(JobHandle {
            job_id: job.job_id.clone(),
        })
    }

    async fn receive(&self, max_batch: usize, wait_timeout: Duration) -> Result<Vec<LeasedJob>> {
        let deadline = tokio::time::Instant::now() + wait_timeout;
        loop {
            let leased = self.try_claim(max_batch.max(1)).await?;
            if !leased.is_empty() {
                debug!(count = leased.len(), "Leased scan jobs");
                return Ok(leased);
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(leased);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<()> {
        let result = sqlx::query("DELETE FROM scan_jobs WHERE job_id = ? AND lease_token = ?")
            .bind(&lease.job_id)
            .bind(&lease.token)
            .execute(&self.pool)
            .await
            .map_err(broker_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::LeaseExpired(format!(
                "job {} is no longer held by lease {}",
                lease.job_id, lease.token
            )));
        }
        Ok(())
    }

    async fn extend_lease(&self, lease: &Lease, extra: Duration) -> Result<Lease> {
        let now = self.time_provider.now_millis();
        let expires_at: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE scan_jobs
            SET visible_at = MAX(visible_at, ? + ?)
            WHERE job_id = ? AND lease_token = ?
            RETURNING visible_at
            "#,
        )
        .bind(now)
        .bind(extra.as_millis() as i64)
        .bind(&lease.job_id)
        .bind(&lease.token)
        .fetch_optional(&self.pool)
        .await
        .map_err(broker_error)?;

        match expires_at {
            Some(expires_at) => Ok(Lease {
                expires_at,
                ..lease.clone()
            }),
            None => Err(AppError::LeaseExpired(format!(
                "cannot extend lease on job {}",
                lease.job_id
            ))),
        }
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET visible_at = ?, lease_token = NULL
            WHERE job_id = ? AND lease_token = ?
            "#,
        )
        .bind(self.time_provider.now_millis())
        .bind(&lease.job_id)
        .bind(&lease.token)
        .execute(&self.pool)
        .await
        .map_err(broker_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::LeaseExpired(format!(
                "cannot release job {}",
                lease.job_id
            )));
        }
        Ok(())
    }

    async fn snapshot(&self) -> Result<QueueSnapshot> {
        let (waiting, total): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(CASE WHEN visible_at <= ? THEN 1 ELSE 0 END), 0), COUNT(*)
            FROM scan_jobs
            "#,
        )
        .bind(self.time_provider.now_millis())
        .fetch_one(&self.pool)
        .await
        .map_err(broker_error)?;

        Ok(QueueSnapshot::new(waiting as u64, (total - waiting) as u64))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ScanJobRow {
    job_id: String,
    range_start: i64,
    range_end: i64,
    enqueued_at: i64,
    attempt_count: i64,
}

impl ScanJobRow {
    fn into_job(self) -> Result<ScanJob> {
        let range = ChunkRange::new(self.range_start, self.range_end)?;
        Ok(ScanJob {
            attempt_count: self.attempt_count as u32,
            ..ScanJob::new(self.job_id, range, self.enqueued_at)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use rangescan_core::port::id_provider::mocks::SequentialIdProvider;
    use rangescan_core::port::time_provider::mocks::ManualTimeProvider;
    use tempfile::TempDir;

    async fn setup(visibility: Duration) -> (TempDir, Arc<ManualTimeProvider>, SqliteQueueBroker) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(dir.path().join("queue.db").to_str().unwrap())
            .await
            .unwrap();
        run_migrations(&pool).await.unwrap();
        let clock = Arc::new(ManualTimeProvider::new(1_000));
        let broker = SqliteQueueBroker::new(
            pool,
            clock.clone(),
            Arc::new(SequentialIdProvider::new("lease")),
            visibility,
        )
        .with_poll_interval(Duration::from_millis(5));
        (dir, clock, broker)
    }

    fn job(id: &str, start: i64, end: i64) -> ScanJob {
        ScanJob::new(id, ChunkRange::new(start, end).unwrap(), 1_000)
    }

    #[tokio::test]
    async fn test_receive_leases_in_enqueue_order() {
        let (_dir, _clock, broker) = setup(Duration::from_secs(60)).await;
        broker.enqueue(&job("a", 1, 500)).await.unwrap();
        broker.enqueue(&job("b", 501, 1000)).await.unwrap();

        let first = broker.receive(1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].job.job_id, "a");
        assert_eq!(first[0].job.range, ChunkRange::new(1, 500).unwrap());
        assert_eq!(first[0].job.attempt_count, 1);
        assert_eq!(first[0].lease.expires_at, 61_000);

        assert_eq!(broker.snapshot().await.unwrap(), QueueSnapshot::new(1, 1));
    }

    #[tokio::test]
    async fn test_empty_queue_long_polls_until_timeout() {
        let (_dir, _clock, broker) = setup(Duration::from_secs(60)).await;
        let started = tokio::time::Instant::now();
        let leased = broker.receive(1, Duration::from_millis(50)).await.unwrap();
        assert!(leased.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_expired_lease_redelivers_with_new_token() {
        let (_dir, clock, broker) = setup(Duration::from_secs(60)).await;
        broker.enqueue(&job("a", 1, 10)).await.unwrap();

        let first = broker.receive(1, Duration::from_millis(10)).await.unwrap();
        assert!(broker
            .receive(1, Duration::from_millis(10))
            .await
            .unwrap()
            .is_empty());

        clock.advance(60_000);
        let second = broker.receive(1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(second[0].job.attempt_count, 2);
        assert_ne!(second[0].lease.token, first[0].lease.token);

        let stale = broker.ack(&first[0].lease).await;
        assert!(matches!(stale, Err(AppError::LeaseExpired(_))));
        broker.ack(&second[0].lease).await.unwrap();
        assert_eq!(broker.snapshot().await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_extend_lease_pushes_deadline() {
        let (_dir, clock, broker) = setup(Duration::from_secs(10)).await;
        broker.enqueue(&job("a", 1, 10)).await.unwrap();
        let leased = broker.receive(1, Duration::from_millis(10)).await.unwrap();

        let extended = broker
            .extend_lease(&leased[0].lease, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(extended.expires_at, 1_000 + 30_000);

        clock.advance(20_000);
        assert!(broker
            .receive(1, Duration::from_millis(10))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_heartbeats_keep_deadline_one_extension_ahead() {
        let (_dir, clock, broker) = setup(Duration::from_secs(60)).await;
        broker.enqueue(&job("a", 1, 10)).await.unwrap();
        let leased = broker.receive(1, Duration::from_millis(10)).await.unwrap();

        let mut lease = leased[0].lease.clone();
        for _ in 0..20 {
            clock.advance(10_000);
            lease = broker
                .extend_lease(&lease, Duration::from_secs(60))
                .await
                .unwrap();
        }
        let last_heartbeat = 1_000 + 20 * 10_000;
        assert_eq!(lease.expires_at, last_heartbeat + 60_000);

        // Worker dies: the job is back one visibility window after its last heartbeat
        clock.set(last_heartbeat + 59_999);
        assert!(broker
            .receive(1, Duration::from_millis(10))
            .await
            .unwrap()
            .is_empty());
        clock.set(last_heartbeat + 60_000);
        let redelivered = broker.receive(1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].job.attempt_count, 2);
    }

    #[tokio::test]
    async fn test_release_makes_job_visible_again() {
        let (_dir, _clock, broker) = setup(Duration::from_secs(900)).await;
        broker.enqueue(&job("a", 1, 10)).await.unwrap();
        let leased = broker.receive(1, Duration::from_millis(10)).await.unwrap();

        broker.release(&leased[0].lease).await.unwrap();
        let again = broker.receive(1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(again[0].job.job_id, "a");

        // The released token is dead
        let stale = broker
            .extend_lease(&leased[0].lease, Duration::from_secs(1))
            .await;
        assert!(matches!(stale, Err(AppError::LeaseExpired(_))));
    }

    #[tokio::test]
    async fn test_duplicate_job_id_is_conflict() {
        let (_dir, _clock, broker) = setup(Duration::from_secs(60)).await;
        broker.enqueue(&job("a", 1, 10)).await.unwrap();
        let err = broker.enqueue(&job("a", 1, 10)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_concurrent_receivers_never_share_a_job() {
        let (_dir, _clock, broker) = setup(Duration::from_secs(900)).await;
        for i in 0..20 {
            broker
                .enqueue(&job(&format!("job-{}", i), i * 10 + 1, i * 10 + 10))
                .await
                .unwrap();
        }
        let broker = Arc::new(broker);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                loop {
                    let leased = broker.receive(2, Duration::from_millis(10)).await.unwrap();
                    if leased.is_empty() {
                        break;
                    }
                    ids.extend(leased.into_iter().map(|l| l.job.job_id));
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let received = all.len();
        all.sort();
        all.dedup();
        assert_eq!(received, 20);
        assert_eq!(all.len(), 20);
    }
}
