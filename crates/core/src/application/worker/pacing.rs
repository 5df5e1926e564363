// Inter-request pacing for one scan task
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// One pacer per scan task slot, shared by every chunk a pool processes
pub type PacerSlots = Arc<[Mutex<Pacer>]>;

/// Build `count` slots (at least one) with the same delay floor
pub fn pacer_slots(delay: Duration, count: usize) -> PacerSlots {
    (0..count.max(1)).map(|_| Mutex::new(Pacer::new(delay))).collect()
}

/// Fixed floor between the starts of successive requests (not a token bucket)
pub struct Pacer {
    delay: Duration,
    last_request: Option<Instant>,
}

impl Pacer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            last_request: None,
        }
    }

    /// Wait until the next request may start, then mark it as started
    pub async fn wait_turn(&mut self) {
        if let Some(last) = self.last_request {
            sleep_until(last + self.delay).await;
        }
        self.last_request = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_request_is_immediate() {
        let mut pacer = Pacer::new(Duration::from_secs(3600));
        let started = Instant::now();
        pacer.wait_turn().await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_slots_never_empty() {
        let slots = pacer_slots(Duration::ZERO, 0);
        assert_eq!(slots.len(), 1);
        assert_eq!(pacer_slots(Duration::ZERO, 4).len(), 4);
    }

    #[tokio::test]
    async fn test_successive_requests_respect_floor() {
        let delay = Duration::from_millis(20);
        let mut pacer = Pacer::new(delay);
        let mut stamps = Vec::new();
        for _ in 0..4 {
            pacer.wait_turn().await;
            stamps.push(Instant::now());
        }
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= delay);
        }
    }
}
