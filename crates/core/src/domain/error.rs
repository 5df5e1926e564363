// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid worker state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid range: start {start} > end {end}")]
    InvalidRange { start: i64, end: i64 },

    #[error("Invalid outcome: {0}")]
    InvalidOutcome(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
