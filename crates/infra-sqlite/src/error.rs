// sqlx::Error classification
// (orphan rules: no From<sqlx::Error> for AppError, so adapters map explicitly)

use rangescan_core::error::AppError;

/// SQLite extended result codes: https://www.sqlite.org/rescode.html
fn constraint_violation(err: &sqlx::Error) -> Option<String> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    let code = db_err.code()?;
    match code.as_ref() {
        // UNIQUE / PRIMARY KEY / CHECK / NOT NULL
        "2067" | "1555" | "275" | "1299" => Some(format!(
            "{} ({})",
            db_err.message(),
            code.as_ref()
        )),
        _ => None,
    }
}

fn describe(err: &sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) => match db_err.code() {
            // SQLITE_BUSY / SQLITE_LOCKED
            Some(code) if code.as_ref() == "5" || code.as_ref() == "6" => {
                format!("database locked: {}", db_err.message())
            }
            Some(code) => format!("database error [{}]: {}", code, db_err.message()),
            None => format!("database error: {}", db_err.message()),
        },
        sqlx::Error::PoolTimedOut => "connection pool timed out".to_string(),
        other => other.to_string(),
    }
}

/// Queue-side failures: everything but constraint violations is worth a retry
pub(crate) fn broker_error(err: sqlx::Error) -> AppError {
    if let Some(message) = constraint_violation(&err) {
        return AppError::Conflict(message);
    }
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            AppError::Internal(describe(&err))
        }
        _ => AppError::TransientBroker(describe(&err)),
    }
}

/// Result store and registry failures
pub(crate) fn storage_error(err: sqlx::Error) -> AppError {
    if let Some(message) = constraint_violation(&err) {
        return AppError::Conflict(message);
    }
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            AppError::Internal(describe(&err))
        }
        _ => AppError::StorageUnavailable(describe(&err)),
    }
}
