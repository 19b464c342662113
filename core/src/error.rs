use std::time::Duration;
use thiserror::Error;

/// Substrings that mark an otherwise unclassified store error as worth retrying.
const TRANSIENT_INDICATORS: &[&str] = &[
    "timeout",
    "connection",
    "network",
    "temporary",
    "503",
    "502",
    "504",
];

/// Caller-facing error taxonomy. Each variant maps to one status band.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Application '{id}' not found")]
    NotFound { id: String },

    #[error("Scoring unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Persistence failed after {attempts} attempt(s): {reason}")]
    Persistence { attempts: u32, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::Unauthorized(_) => 401,
            ServiceError::NotFound { .. } => 404,
            ServiceError::ServiceUnavailable(_) => 503,
            ServiceError::Inference(_)
            | ServiceError::Persistence { .. }
            | ServiceError::Store(_)
            | ServiceError::Serialization(_)
            | ServiceError::Other(_) => 500,
        }
    }

    /// Message safe to show a caller. Internal causes stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            ServiceError::Validation(msg) => format!("Invalid request: {msg}"),
            ServiceError::Unauthorized(_) => "Authentication required".into(),
            ServiceError::NotFound { .. } => "Application not found".into(),
            ServiceError::ServiceUnavailable(_) => {
                "Scoring service is temporarily unavailable. Please try again later.".into()
            }
            ServiceError::Inference(_) => {
                "An error occurred while processing your request. Please verify your input and try again."
                    .into()
            }
            ServiceError::Persistence { .. } => {
                "The application could not be saved. Please try again later.".into()
            }
            ServiceError::Store(_) | ServiceError::Serialization(_) | ServiceError::Other(_) => {
                "An internal error occurred. Please try again later.".into()
            }
        }
    }

    /// Stable class name used in log lines.
    pub fn class(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::Unauthorized(_) => "unauthorized",
            ServiceError::NotFound { .. } => "not_found",
            ServiceError::ServiceUnavailable(_) => "service_unavailable",
            ServiceError::Inference(_) => "inference",
            ServiceError::Persistence { .. } => "persistence",
            ServiceError::Store(_) => "store",
            ServiceError::Serialization(_) => "serialization",
            ServiceError::Other(_) => "other",
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors raised by a Data Store client.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Upstream returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Row rejected by policy: {0}")]
    PolicyViolation(String),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    /// Whether a retry of the same single-row operation may succeed.
    ///
    /// Structured signals decide first; only `Other` falls back to
    /// matching its message text.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout(_) | StoreError::Connection(_) => true,
            StoreError::Status { status, .. } => matches!(status, 502..=504),
            StoreError::Database(err) => matches!(
                err.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy) | Some(rusqlite::ErrorCode::DatabaseLocked)
            ),
            StoreError::PolicyViolation(_) | StoreError::CorruptRow(_) => false,
            StoreError::Other(message) => {
                let lower = message.to_lowercase();
                TRANSIENT_INDICATORS.iter().any(|ind| lower.contains(ind))
            }
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_signals_classify_without_message_matching() {
        assert!(StoreError::Timeout(Duration::from_secs(2)).is_transient());
        assert!(StoreError::Connection("reset by peer".into()).is_transient());
        assert!(StoreError::Status { status: 503, message: "busy".into() }.is_transient());
        assert!(!StoreError::Status { status: 500, message: "timeout".into() }.is_transient());
        assert!(!StoreError::PolicyViolation("network".into()).is_transient());
    }

    #[test]
    fn unclassified_errors_fall_back_to_indicators() {
        assert!(StoreError::Other("Gateway Timeout".into()).is_transient());
        assert!(StoreError::Other("upstream said 502".into()).is_transient());
        assert!(!StoreError::Other("duplicate key value".into()).is_transient());
    }

    #[test]
    fn sqlite_busy_is_transient_and_constraint_is_not() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(StoreError::Database(busy).is_transient());

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("CHECK constraint failed".into()),
        );
        assert!(!StoreError::Database(constraint).is_transient());
    }

    #[test]
    fn status_bands() {
        assert_eq!(ServiceError::Validation("x".into()).status_code(), 400);
        assert_eq!(ServiceError::Unauthorized("x".into()).status_code(), 401);
        assert_eq!(ServiceError::ServiceUnavailable("x".into()).status_code(), 503);
        assert_eq!(ServiceError::Inference("x".into()).status_code(), 500);
        assert_eq!(
            ServiceError::Persistence { attempts: 3, reason: "x".into() }.status_code(),
            500
        );
    }

    #[test]
    fn inference_cause_is_not_exposed() {
        let err = ServiceError::Inference("feature 'fico' missing from vector".into());
        assert!(!err.public_message().contains("fico"));
    }
}
