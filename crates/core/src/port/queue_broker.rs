// Queue Broker Port (Interface)

use crate::domain::{JobHandle, Lease, LeasedJob, QueueSnapshot, ScanJob};
use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Durable, at-least-once handoff of scan jobs to any number of workers
///
/// The broker is the sole owner of "who currently holds this job". It does
/// not deduplicate: callers that need idempotent enqueue must de-duplicate
/// ranges themselves.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Enqueue a job
    ///
    /// # Errors
    /// - AppError::TransientBroker on service failure (caller may retry)
    async fn enqueue(&self, job: &ScanJob) -> Result<JobHandle>;

    /// Receive up to `max_batch` jobs, blocking up to `wait_timeout`
    ///
    /// Each returned job is invisible to other receivers until its lease
    /// expires, is released, or is acked.
    async fn receive(&self, max_batch: usize, wait_timeout: Duration) -> Result<Vec<LeasedJob>>;

    /// Permanently remove the job
    ///
    /// Call only after every result of the chunk is durably written.
    ///
    /// # Errors
    /// - AppError::LeaseExpired if the lease is no longer current
    async fn ack(&self, lease: &Lease) -> Result<()>;

    /// Keep the job leased for at least `extra` from now
    ///
    /// The deadline becomes max(deadline, now + extra), so repeated heartbeats
    /// never push it further than one extension past the last call.
    async fn extend_lease(&self, lease: &Lease, extra: Duration) -> Result<Lease>;

    /// Give the job back for immediate redelivery (NACK)
    async fn release(&self, lease: &Lease) -> Result<()>;

    /// Approximate waiting / in-flight counts (observability only)
    async fn snapshot(&self) -> Result<QueueSnapshot>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use crate::port::TimeProvider;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;

    struct Entry {
        job: ScanJob,
        visible_at: i64,
        token: Option<String>,
    }

    #[derive(Default)]
    struct State {
        entries: Vec<Entry>,
        next_token: u64,
        fail_enqueues: usize,
        fail_receives: usize,
        fail_acks: usize,
        acked: Vec<String>,
        deliveries: HashMap<String, u32>,
    }

    /// In-memory broker with visibility timeouts driven by a TimeProvider
    pub struct InMemoryQueueBroker {
        state: Mutex<State>,
        notify: Notify,
        visibility_timeout: Duration,
        time_provider: Arc<dyn TimeProvider>,
    }

    impl InMemoryQueueBroker {
        pub fn new(time_provider: Arc<dyn TimeProvider>, visibility_timeout: Duration) -> Self {
            Self {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                visibility_timeout,
                time_provider,
            }
        }

        /// Fail the next `n` enqueue calls with TransientBroker
        pub fn fail_next_enqueues(&self, n: usize) {
            self.state.lock().unwrap().fail_enqueues = n;
        }

        /// Fail the next `n` receive calls with TransientBroker
        pub fn fail_next_receives(&self, n: usize) {
            self.state.lock().unwrap().fail_receives = n;
        }

        /// Fail the next `n` ack calls with TransientBroker
        pub fn fail_next_acks(&self, n: usize) {
            self.state.lock().unwrap().fail_acks = n;
        }

        /// Job IDs acked so far, in order
        pub fn acked(&self) -> Vec<String> {
            self.state.lock().unwrap().acked.clone()
        }

        /// Times `job_id` has been delivered
        pub fn delivery_count(&self, job_id: &str) -> u32 {
            self.state
                .lock()
                .unwrap()
                .deliveries
                .get(job_id)
                .copied()
                .unwrap_or(0)
        }

        /// Jobs still in the queue (waiting or in flight)
        pub fn len(&self) -> usize {
            self.state.lock().unwrap().entries.len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        fn try_claim(&self, max_batch: usize) -> Result<Vec<LeasedJob>> {
            let now = self.time_provider.now_millis();
            let mut state = self.state.lock().unwrap();

            if state.fail_receives > 0 {
                state.fail_receives -= 1;
                return Err(AppError::TransientBroker("injected receive failure".into()));
            }

            let expires_at = now + self.visibility_timeout.as_millis() as i64;
            let visible: Vec<usize> = state
                .entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| entry.visible_at <= now)
                .map(|(idx, _)| idx)
                .take(max_batch)
                .collect();

            let mut leased = Vec::with_capacity(visible.len());
            for idx in visible {
                state.next_token += 1;
                let token = format!("lease-{}", state.next_token);
                let entry = &mut state.entries[idx];
                entry.visible_at = expires_at;
                entry.token = Some(token.clone());
                entry.job.attempt_count += 1;

                let job = entry.job.clone();
                *state.deliveries.entry(job.job_id.clone()).or_insert(0) += 1;
                leased.push(LeasedJob {
                    lease: Lease {
                        job_id: job.job_id.clone(),
                        token,
                        expires_at,
                    },
                    job,
                });
            }

            Ok(leased)
        }

        fn position(state: &State, lease: &Lease) -> Option<usize> {
            state.entries.iter().position(|e| {
                e.job.job_id == lease.job_id && e.token.as_deref() == Some(lease.token.as_str())
            })
        }
    }

    #[async_trait]
    impl QueueBroker for InMemoryQueueBroker {
        async fn enqueue(&self, job: &ScanJob) -> Result<JobHandle> {
            let now = self.time_provider.now_millis();
            {
                let mut state = self.state.lock().unwrap();
                if state.fail_enqueues > 0 {
                    state.fail_enqueues -= 1;
                    return Err(AppError::TransientBroker("injected enqueue failure".into()));
                }
                state.entries.push(Entry {
                    job: job.clone(),
                    visible_at: now,
                    token: None,
                });
            }
            self.notify.notify_waiters();
            Ok(JobHandle {
                job_id: job.job_id.clone(),
            })
        }

        async fn receive(&self, max_batch: usize, wait_timeout: Duration) -> Result<Vec<LeasedJob>> {
            let deadline = tokio::time::Instant::now() + wait_timeout;
            loop {
                let notified = self.notify.notified();
                let leased = self.try_claim(max_batch.max(1))?;
                if !leased.is_empty() {
                    return Ok(leased);
                }
                // Visibility is driven by the injected clock, so poll as well as wait
                let poll = tokio::time::Instant::now() + Duration::from_millis(5);
                let wake_at = poll.min(deadline);
                tokio::select! {
                    _ = notified => {},
                    _ = tokio::time::sleep_until(wake_at) => {},
                }
                if tokio::time::Instant::now() >= deadline {
                    return self.try_claim(max_batch.max(1));
                }
            }
        }

        async fn ack(&self, lease: &Lease) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if state.fail_acks > 0 {
                state.fail_acks -= 1;
                return Err(AppError::TransientBroker("injected ack failure".into()));
            }
            match Self::position(&state, lease) {
                Some(idx) => {
                    let entry = state.entries.remove(idx);
                    state.acked.push(entry.job.job_id);
                    Ok(())
                }
                None => Err(AppError::LeaseExpired(format!(
                    "job {} is no longer held by lease {}",
                    lease.job_id, lease.token
                ))),
            }
        }

        async fn extend_lease(&self, lease: &Lease, extra: Duration) -> Result<Lease> {
            let now = self.time_provider.now_millis();
            let mut state = self.state.lock().unwrap();
            let idx = Self::position(&state, lease).ok_or_else(|| {
                AppError::LeaseExpired(format!("cannot extend lease on job {}", lease.job_id))
            })?;
            let entry = &mut state.entries[idx];
            entry.visible_at = entry.visible_at.max(now + extra.as_millis() as i64);
            Ok(Lease {
                expires_at: entry.visible_at,
                ..lease.clone()
            })
        }

        async fn release(&self, lease: &Lease) -> Result<()> {
            let now = self.time_provider.now_millis();
            {
                let mut state = self.state.lock().unwrap();
                let idx = Self::position(&state, lease).ok_or_else(|| {
                    AppError::LeaseExpired(format!("cannot release job {}", lease.job_id))
                })?;
                let entry = &mut state.entries[idx];
                entry.visible_at = now;
                entry.token = None;
            }
            self.notify.notify_waiters();
            Ok(())
        }

        async fn snapshot(&self) -> Result<QueueSnapshot> {
            let now = self.time_provider.now_millis();
            let state = self.state.lock().unwrap();
            let waiting = state.entries.iter().filter(|e| e.visible_at <= now).count() as u64;
            let in_flight = state.entries.len() as u64 - waiting;
            Ok(QueueSnapshot::new(waiting, in_flight))
        }
    }
}
