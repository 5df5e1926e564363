// Backoff policy for transient broker failures
use crate::error::Result;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Exponential backoff with ±10% jitter
///
/// delay = min(base_delay * factor ^ (attempt - 1), max_delay) * (0.9 .. 1.1)
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base_delay: Duration,
    factor: f64,
    max_delay: Duration,
    max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(60), 5)
    }
}

impl BackoffPolicy {
    /// Create a new backoff policy
    ///
    /// # Arguments
    /// * `base_delay` - Delay before the first retry
    /// * `factor` - Growth factor per attempt
    /// * `max_delay` - Upper bound before jitter
    /// * `max_attempts` - Total attempts `retry` makes (including the first)
    pub fn new(base_delay: Duration, factor: f64, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            factor,
            max_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the given failed attempt (1-based), before jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.factor.powi(exp);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }

    /// Delay after the given failed attempt, with jitter applied
    ///
    /// Jitter keeps a fleet of workers from retrying in lockstep.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0.9..=1.1);
        self.base_delay_for(attempt).mul_f64(jitter)
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or
    /// `max_attempts` is exhausted
    pub async fn retry<T, F, Fut>(&self, op_name: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        op = op_name,
                        attempt = attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(1),
            2.0,
            Duration::from_millis(4),
            max_attempts,
        )
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = BackoffPolicy::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(500),
            10,
        );
        assert_eq!(policy.base_delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.base_delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.base_delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let d = policy.delay_for(1).as_secs_f64();
            assert!((0.9..=1.1).contains(&d), "delay {} out of bounds", d);
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = fast_policy(5)
            .retry("enqueue", move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(AppError::TransientBroker("throttled".into()))
                } else {
                    Ok(n)
                }
            })
            .await;

        let value = tokio_test::assert_ok!(result);
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast_policy(3)
            .retry("ack", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::TransientBroker("down".into()))
            })
            .await;

        assert!(matches!(result, Err(AppError::TransientBroker(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_retry_fatal_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast_policy(5)
            .retry("ack", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::LeaseExpired("gone".into()))
            })
            .await;

        assert!(matches!(result, Err(AppError::LeaseExpired(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
