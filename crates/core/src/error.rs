// Central Error Type for the Application

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    /// Bad partition or worker inputs: fatal, never retried
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Enqueue/receive/ack failure: retried with backoff by the caller
    #[error("Transient broker error: {0}")]
    TransientBroker(String),

    /// The lease token is no longer current (job redelivered or acked)
    #[error("Lease expired: {0}")]
    LeaseExpired(String),

    /// Result store unreachable: blocks ack, chunk goes back to redelivery
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Scan error: {0}")]
    Scan(#[from] crate::port::ScanError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors worth retrying in-process with backoff
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::TransientBroker(_))
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in the infra-sqlite crate, which
// classifies it into TransientBroker / StorageUnavailable / Conflict
