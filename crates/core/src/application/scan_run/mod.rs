// Scan Run Service - Enqueue side of a scan run

pub mod enqueue;

pub use enqueue::{EnqueueReport, EnqueueRequest};

use crate::application::backoff::BackoffPolicy;
use crate::domain::QueueSnapshot;
use crate::error::Result;
use crate::port::{IdProvider, QueueBroker, TimeProvider};
use std::sync::Arc;

pub struct ScanRunService {
    broker: Arc<dyn QueueBroker>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    backoff: BackoffPolicy,
}

impl ScanRunService {
    pub fn new(
        broker: Arc<dyn QueueBroker>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            broker,
            id_provider,
            time_provider,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Partition and enqueue a range
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<EnqueueReport> {
        enqueue::execute(
            self.broker.as_ref(),
            self.id_provider.as_ref(),
            self.time_provider.as_ref(),
            &self.backoff,
            req,
        )
        .await
    }

    /// Current queue counts (eventually consistent)
    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        self.broker.snapshot().await
    }
}
