// Node Registry Port
// Per-node progress markers consumed by the status monitor

use crate::domain::{NodeHeartbeat, NodeProgress};
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Record a worker pool start
    ///
    /// Re-registration of a known node counts as a restart
    /// (`restarts_since_progress += 1`).
    async fn register(&self, node_id: &str, now_millis: i64) -> Result<()>;

    /// Record state, liveness and progress since the last heartbeat
    async fn heartbeat(&self, heartbeat: &NodeHeartbeat) -> Result<()>;

    /// All known nodes, ordered by node ID
    async fn list(&self) -> Result<Vec<NodeProgress>>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryNodeRegistry {
        nodes: Mutex<BTreeMap<String, NodeProgress>>,
        heartbeats: Mutex<Vec<NodeHeartbeat>>,
    }

    impl InMemoryNodeRegistry {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed or overwrite a record directly
        pub fn put(&self, node: NodeProgress) {
            self.nodes
                .lock()
                .unwrap()
                .insert(node.node_id.clone(), node);
        }

        pub fn get(&self, node_id: &str) -> Option<NodeProgress> {
            self.nodes.lock().unwrap().get(node_id).cloned()
        }

        /// Every heartbeat received, in order
        pub fn heartbeats(&self) -> Vec<NodeHeartbeat> {
            self.heartbeats.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NodeRegistry for InMemoryNodeRegistry {
        async fn register(&self, node_id: &str, now_millis: i64) -> Result<()> {
            self.nodes
                .lock()
                .unwrap()
                .entry(node_id.to_string())
                .and_modify(|node| node.restarted(now_millis))
                .or_insert_with(|| NodeProgress::registered(node_id, now_millis));
            Ok(())
        }

        async fn heartbeat(&self, heartbeat: &NodeHeartbeat) -> Result<()> {
            self.heartbeats.lock().unwrap().push(heartbeat.clone());
            let mut nodes = self.nodes.lock().unwrap();
            let node = nodes.get_mut(&heartbeat.node_id).ok_or_else(|| {
                AppError::NotFound(format!("node {} is not registered", heartbeat.node_id))
            })?;
            node.apply(heartbeat);
            Ok(())
        }

        async fn list(&self) -> Result<Vec<NodeProgress>> {
            Ok(self.nodes.lock().unwrap().values().cloned().collect())
        }
    }
}
