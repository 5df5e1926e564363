// Queue Domain Model

use serde::{Deserialize, Serialize};

/// Point-in-time queue counts
///
/// Eventually consistent. For dashboards only: never decide "queue is empty,
/// stop workers" from a snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub waiting_count: u64,
    pub in_flight_count: u64,
}

impl QueueSnapshot {
    pub fn new(waiting_count: u64, in_flight_count: u64) -> Self {
        Self {
            waiting_count,
            in_flight_count,
        }
    }

    pub fn total(&self) -> u64 {
        self.waiting_count + self.in_flight_count
    }
}
