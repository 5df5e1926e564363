// Scan Result Domain Model

use serde::{Deserialize, Serialize};

use super::error::DomainError;
use super::scan_job::CandidateId;

/// Terminal outcome of scanning one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanOutcome {
    Hit,
    Miss,
    Error,
}

impl ScanOutcome {
    pub const ALL: [ScanOutcome; 3] = [ScanOutcome::Hit, ScanOutcome::Miss, ScanOutcome::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanOutcome::Hit => "HIT",
            ScanOutcome::Miss => "MISS",
            ScanOutcome::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScanOutcome {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HIT" => Ok(ScanOutcome::Hit),
            "MISS" => Ok(ScanOutcome::Miss),
            "ERROR" => Ok(ScanOutcome::Error),
            other => Err(DomainError::InvalidOutcome(other.to_string())),
        }
    }
}

/// Result of scanning one candidate
///
/// Stored at most once per `candidate_id`; see `ResultSink` for the
/// conflict rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub candidate_id: CandidateId,
    pub outcome: ScanOutcome,
    pub discovered_at: i64, // epoch ms
    pub payload: Option<serde_json::Value>,
}

impl ScanResult {
    pub fn new(
        candidate_id: CandidateId,
        outcome: ScanOutcome,
        discovered_at: i64,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            candidate_id,
            outcome,
            discovered_at,
            payload,
        }
    }

    pub fn hit(candidate_id: CandidateId, discovered_at: i64) -> Self {
        Self::new(candidate_id, ScanOutcome::Hit, discovered_at, None)
    }

    pub fn miss(candidate_id: CandidateId, discovered_at: i64) -> Self {
        Self::new(candidate_id, ScanOutcome::Miss, discovered_at, None)
    }

    /// Error outcome carrying the last failure message
    pub fn error(candidate_id: CandidateId, discovered_at: i64, message: impl Into<String>) -> Self {
        Self::new(
            candidate_id,
            ScanOutcome::Error,
            discovered_at,
            Some(serde_json::json!({ "error": message.into() })),
        )
    }
}

/// Row as held by a result store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredResult {
    pub candidate_id: CandidateId,
    pub outcome: ScanOutcome,
    pub payload: Option<serde_json::Value>,
    /// First time this candidate was written
    pub discovered_at: i64,
    /// Scan timestamp of the write currently holding `outcome`
    pub updated_at: i64,
    pub write_count: i64,
}

impl StoredResult {
    /// First write of a candidate
    pub fn from_first(result: &ScanResult) -> Self {
        Self {
            candidate_id: result.candidate_id,
            outcome: result.outcome,
            payload: result.payload.clone(),
            discovered_at: result.discovered_at,
            updated_at: result.discovered_at,
            write_count: 1,
        }
    }

    /// Apply a later write: last-write-wins by scan timestamp (ties go to the
    /// incoming write), `discovered_at` is kept from the first write.
    pub fn merge(&mut self, result: &ScanResult) {
        if result.discovered_at >= self.updated_at {
            self.outcome = result.outcome;
            self.payload = result.payload.clone();
            self.updated_at = result.discovered_at;
        }
        self.write_count += 1;
    }
}
