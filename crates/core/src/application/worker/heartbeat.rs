// Lease heartbeat for an in-flight chunk

use super::progress::NodeReporter;
use crate::domain::Lease;
use crate::port::QueueBroker;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Periodically extends the chunk lease and flushes node progress
///
/// Stops when dropped.
pub struct LeaseHeartbeat {
    handle: JoinHandle<()>,
}

impl LeaseHeartbeat {
    pub fn start(
        broker: Arc<dyn QueueBroker>,
        reporter: Arc<NodeReporter>,
        lease: Lease,
        interval: Duration,
        extension: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            let mut lease = lease;
            loop {
                ticker.tick().await;
                match broker.extend_lease(&lease, extension).await {
                    Ok(extended) => {
                        debug!(
                            job_id = %extended.job_id,
                            expires_at = extended.expires_at,
                            "Extended lease"
                        );
                        lease = extended;
                    }
                    Err(e) => {
                        // Results stay idempotent if the chunk is redelivered
                        warn!(job_id = %lease.job_id, error = %e, "Failed to extend lease");
                    }
                }
                reporter.flush().await;
            }
        });
        Self { handle }
    }
}

impl Drop for LeaseHeartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChunkRange, ScanJob};
    use crate::port::node_registry::mocks::InMemoryNodeRegistry;
    use crate::port::queue_broker::mocks::InMemoryQueueBroker;
    use crate::port::time_provider::mocks::ManualTimeProvider;

    #[tokio::test]
    async fn test_heartbeat_extends_lease_until_dropped() {
        let clock = Arc::new(ManualTimeProvider::new(0));
        let broker = Arc::new(InMemoryQueueBroker::new(
            clock.clone(),
            Duration::from_secs(10),
        ));
        let registry = Arc::new(InMemoryNodeRegistry::new());
        let reporter = Arc::new(NodeReporter::new("n", registry.clone(), clock.clone()));
        reporter.register().await.unwrap();

        broker
            .enqueue(&ScanJob::new("a", ChunkRange::new(1, 5).unwrap(), 0))
            .await
            .unwrap();
        let leased = broker.receive(1, Duration::from_millis(10)).await.unwrap();

        let heartbeat = LeaseHeartbeat::start(
            broker.clone(),
            reporter,
            leased[0].lease.clone(),
            Duration::from_millis(10),
            Duration::from_secs(60),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(heartbeat);

        // Original 10s window has passed but the extension keeps it leased
        clock.advance(30_000);
        assert!(broker
            .receive(1, Duration::from_millis(10))
            .await
            .unwrap()
            .is_empty());
        assert!(!registry.heartbeats().is_empty());

        // Many beats at the same instant still leave a single 60s extension
        clock.advance(30_000);
        let redelivered = broker.receive(1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(redelivered.len(), 1);
    }
}
