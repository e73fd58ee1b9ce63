//! Core error types for flowstate-core.
//!
//! Every fallible layer has its own enum; [`CoreError`] wraps them all for
//! callers that cross layers (the service wiring and the CLI).

use std::path::PathBuf;
use thiserror::Error;

use crate::readings::SignalType;

/// Core error type for flowstate-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Bad input rejected before it reached storage
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Local store failures
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Remote submission failures
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    /// Periodic job registration failures
    #[error("Scheduling error: {0}")]
    Scheduling(#[from] SchedulingError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Validation errors raised by the ingestion layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Timestamps are epoch milliseconds and may not precede the epoch
    #[error("Invalid timestamp {0}: must be a non-negative epoch-millisecond value")]
    NegativeTimestamp(i64),

    /// Past the last instant a calendar date can represent
    #[error("Invalid timestamp {0}: beyond the representable date range")]
    TimestampOutOfRange(i64),

    /// Invalid time range
    #[error("Invalid time range: end ({end}) must be greater than start ({start})")]
    InvalidTimeRange { start: i64, end: i64 },

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl ValidationError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Local store errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A writer panicked while holding the connection
    #[error("Database connection lock poisoned")]
    Poisoned,

    /// A payload was written to a table of another signal type
    #[error("Payload for {actual} cannot be stored in the {expected} table")]
    SignalMismatch {
        expected: SignalType,
        actual: SignalType,
    },
}

/// Remote sync errors.
///
/// None of these lose data: the rows of a failed submission stay pending and
/// are offered again by the next pass.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Remote rejected batch with status {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Rate limited")]
    RateLimited,

    #[error("Remote endpoint not configured")]
    NotConfigured,

    #[error("Invalid remote URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Row cannot be encoded for the remote: {0}")]
    Encoding(String),

    #[error("Storage error during sync: {0}")]
    Storage(#[from] StorageError),

    #[error("Sync task failed: {0}")]
    Task(String),
}

/// Periodic job registration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    /// No tokio runtime to host the job
    #[error("No async runtime available to host job '{job}'")]
    RuntimeUnavailable { job: String },

    /// Periods must be positive
    #[error("Invalid period for job '{job}': must be greater than zero")]
    InvalidPeriod { job: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Failed to parse configuration
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// Could not determine or create the data directory
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg) => {
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy
                {
                    StorageError::Locked
                } else {
                    StorageError::QueryFailed(err.to_string())
                }
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for StorageError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StorageError::Poisoned
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_message_names_field() {
        let err = ValidationError::invalid("bpm", "must be between 1 and 300");
        assert_eq!(
            err.to_string(),
            "Invalid value for 'bpm': must be between 1 and 300"
        );
    }

    #[test]
    fn core_error_wraps_layers() {
        let err: CoreError = ValidationError::NegativeTimestamp(-1).into();
        assert!(matches!(err, CoreError::Validation(_)));

        let err: CoreError = StorageError::Locked.into();
        assert!(err.to_string().contains("locked"));
    }

    #[test]
    fn sqlite_busy_maps_to_locked() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(StorageError::from(err), StorageError::Locked));
    }
}
