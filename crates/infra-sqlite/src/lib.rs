// Rangescan Infrastructure - SQLite Adapter
// Implements: QueueBroker, ResultSink, NodeRegistry

mod connection;
mod error;
mod migration;
mod node_registry;
mod queue_broker;
mod result_sink;

pub use connection::create_pool;
pub use migration::run_migrations;
pub use node_registry::SqliteNodeRegistry;
pub use queue_broker::SqliteQueueBroker;
pub use result_sink::SqliteResultSink;
pub use sqlx::SqlitePool;

/// Open (creating if needed) and migrate a database file
pub async fn open_database(database_url: &str) -> rangescan_core::Result<sqlx::SqlitePool> {
    let pool = create_pool(database_url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
