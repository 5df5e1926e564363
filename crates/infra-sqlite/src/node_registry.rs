// SQLite NodeRegistry Implementation

use crate::error::storage_error;
use async_trait::async_trait;
use rangescan_core::domain::{NodeHeartbeat, NodeProgress, WorkerState};
use rangescan_core::error::{AppError, Result};
use rangescan_core::port::NodeRegistry;
use sqlx::SqlitePool;

pub struct SqliteNodeRegistry {
    pool: SqlitePool,
}

impl SqliteNodeRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NodeRegistry for SqliteNodeRegistry {
    async fn register(&self, node_id: &str, now_millis: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO worker_nodes (
                node_id, state, last_seen_at, state_changed_at, started_at,
                processed_count, restarts_since_progress
            ) VALUES (?1, ?2, ?3, ?3, ?3, 0, 0)
            ON CONFLICT(node_id) DO UPDATE SET
                state = excluded.state,
                current_job_id = NULL,
                last_seen_at = excluded.last_seen_at,
                state_changed_at = excluded.state_changed_at,
                started_at = excluded.started_at,
                restarts_since_progress = CASE
                    WHEN worker_nodes.state = 'STOPPED' THEN worker_nodes.restarts_since_progress
                    ELSE worker_nodes.restarts_since_progress + 1
                END
            "#,
        )
        .bind(node_id)
        .bind(WorkerState::Idle.as_str())
        .bind(now_millis)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn heartbeat(&self, heartbeat: &NodeHeartbeat) -> Result<()> {
        // SET expressions see the old row, so the state comparison is against
        // the previous state
        let result = sqlx::query(
            r#"
            UPDATE worker_nodes SET
                state_changed_at = CASE WHEN state <> ?2 THEN ?4 ELSE state_changed_at END,
                state = ?2,
                current_job_id = ?3,
                last_seen_at = ?4,
                processed_count = processed_count + ?5,
                last_progress_at = CASE WHEN ?5 > 0 THEN ?4 ELSE last_progress_at END,
                restarts_since_progress = CASE WHEN ?5 > 0 THEN 0 ELSE restarts_since_progress END,
                last_candidate_id = CASE WHEN ?5 > 0 AND ?6 IS NOT NULL
                                         THEN ?6 ELSE last_candidate_id END
            WHERE node_id = ?1
            "#,
        )
        .bind(&heartbeat.node_id)
        .bind(heartbeat.state.as_str())
        .bind(&heartbeat.current_job_id)
        .bind(heartbeat.at)
        .bind(heartbeat.processed_delta as i64)
        .bind(heartbeat.last_candidate_id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "node {} is not registered",
                heartbeat.node_id
            )));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<NodeProgress>> {
        let rows: Vec<NodeRow> = sqlx::query_as("SELECT * FROM worker_nodes ORDER BY node_id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.into_iter().map(NodeRow::into_progress).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct NodeRow {
    node_id: String,
    state: String,
    current_job_id: Option<String>,
    last_candidate_id: Option<i64>,
    processed_count: i64,
    last_progress_at: Option<i64>,
    last_seen_at: i64,
    state_changed_at: i64,
    started_at: i64,
    restarts_since_progress: i64,
}

impl NodeRow {
    fn into_progress(self) -> Result<NodeProgress> {
        Ok(NodeProgress {
            state: self.state.parse::<WorkerState>()?,
            node_id: self.node_id,
            current_job_id: self.current_job_id,
            last_candidate_id: self.last_candidate_id,
            processed_count: self.processed_count as u64,
            last_progress_at: self.last_progress_at,
            last_seen_at: self.last_seen_at,
            state_changed_at: self.state_changed_at,
            started_at: self.started_at,
            restarts_since_progress: self.restarts_since_progress as u32,
        })
    }
}
