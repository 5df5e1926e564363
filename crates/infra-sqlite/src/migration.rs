// Migration Runner

use crate::error::storage_error;
use rangescan_core::error::Result;
use sqlx::SqlitePool;
use tracing::info;

const MIGRATIONS: [(i64, &str, &str); 3] = [
    (1, "Scan job queue", include_str!("../migrations/001_scan_jobs.sql")),
    (2, "Scan results", include_str!("../migrations/002_scan_results.sql")),
    (3, "Worker node registry", include_str!("../migrations/003_worker_nodes.sql")),
];

/// Run database migrations
///
/// Safe to call from every process sharing the file: each migration records
/// its version in the same transaction.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let table_exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='schema_version'",
    )
    .fetch_one(pool)
    .await
    .map_err(storage_error)?;

    let current_version: i64 = if table_exists > 0 {
        sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(pool)
            .await
            .map_err(storage_error)
            .map(|v: Option<i64>| v.unwrap_or(0))?
    } else {
        0
    };

    for (version, name, sql) in MIGRATIONS {
        if current_version < version {
            info!(version, name, "Applying migration");
            apply_migration(pool, sql).await?;
        }
    }

    Ok(())
}

/// Apply a single migration SQL file
async fn apply_migration(pool: &SqlitePool, sql: &str) -> Result<()> {
    let mut tx = pool.begin().await.map_err(storage_error)?;

    // Statements never contain ';' inside literals
    for statement in sql.split(';') {
        let clean_statement = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let clean_statement = clean_statement.trim();

        if !clean_statement.is_empty() {
            sqlx::query(clean_statement)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }
    }

    tx.commit().await.map_err(storage_error)?;
    Ok(())
}
