// SQLite ResultSink Implementation

use crate::error::storage_error;
use async_trait::async_trait;
use rangescan_core::domain::{CandidateId, ScanOutcome, ScanResult, StoredResult};
use rangescan_core::error::Result;
use rangescan_core::port::ResultSink;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use tracing::debug;

/// Conflict rule lives in SQL so concurrent writers from any process agree:
/// newest scan timestamp wins outcome/payload (ties go to the incoming
/// write), discovered_at is never touched after the first insert.
const UPSERT_SQL: &str = r#"
    INSERT INTO scan_results (candidate_id, outcome, payload, discovered_at, updated_at, write_count)
    VALUES (?, ?, ?, ?, ?, 1)
    ON CONFLICT(candidate_id) DO UPDATE SET
        outcome = CASE WHEN excluded.updated_at >= scan_results.updated_at
                       THEN excluded.outcome ELSE scan_results.outcome END,
        payload = CASE WHEN excluded.updated_at >= scan_results.updated_at
                       THEN excluded.payload ELSE scan_results.payload END,
        updated_at = MAX(scan_results.updated_at, excluded.updated_at),
        write_count = scan_results.write_count + 1
"#;

pub struct SqliteResultSink {
    pool: SqlitePool,
}

impl SqliteResultSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultSink for SqliteResultSink {
    async fn upsert(&self, results: &[ScanResult]) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }

        // One transaction per batch: all rows land or none do
        let mut tx = self.pool.begin().await.map_err(storage_error)?;
        for result in results {
            let payload = result.payload.as_ref().map(|p| p.to_string());
            sqlx::query(UPSERT_SQL)
                .bind(result.candidate_id)
                .bind(result.outcome.as_str())
                .bind(payload)
                .bind(result.discovered_at)
                .bind(result.discovered_at)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }
        tx.commit().await.map_err(storage_error)?;

        debug!(rows = results.len(), "Upserted scan results");
        Ok(())
    }

    async fn get(&self, candidate_id: CandidateId) -> Result<Option<StoredResult>> {
        let row = sqlx::query_as::<_, ResultRow>(
            "SELECT * FROM scan_results WHERE candidate_id = ?",
        )
        .bind(candidate_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_error)?;

        row.map(ResultRow::into_stored).transpose()
    }

    async fn count_by_outcome(&self) -> Result<BTreeMap<String, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT outcome, COUNT(*) FROM scan_results GROUP BY outcome")
                .fetch_all(&self.pool)
                .await
                .map_err(storage_error)?;

        Ok(rows
            .into_iter()
            .map(|(outcome, count)| (outcome, count as u64))
            .collect())
    }

    async fn list_by_outcome(&self, outcome: ScanOutcome, limit: u32) -> Result<Vec<StoredResult>> {
        let rows: Vec<ResultRow> = sqlx::query_as(
            r#"
            SELECT * FROM scan_results
            WHERE outcome = ?
            ORDER BY candidate_id ASC
            LIMIT ?
            "#,
        )
        .bind(outcome.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        rows.into_iter().map(ResultRow::into_stored).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ResultRow {
    candidate_id: i64,
    outcome: String,
    payload: Option<String>,
    discovered_at: i64,
    updated_at: i64,
    write_count: i64,
}

impl ResultRow {
    fn into_stored(self) -> Result<StoredResult> {
        let payload = self
            .payload
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;

        Ok(StoredResult {
            candidate_id: self.candidate_id,
            outcome: self.outcome.parse::<ScanOutcome>()?,
            payload,
            discovered_at: self.discovered_at,
            updated_at: self.updated_at,
            write_count: self.write_count,
        })
    }
}
