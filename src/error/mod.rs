use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Harness error: {0}")]
    Harness(#[from] HarnessError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Errors raised by the harness public API.
///
/// Only setup bugs surface here. Runtime conditions under test (simulated
/// failures, open circuits, unknown intent ids during dispatch) are reported
/// as data inside a `DispatchResult` instead.
#[derive(Debug, Error, PartialEq)]
pub enum HarnessError {
    #[error("Harness not initialized: call initialize() before {operation}")]
    NotInitialized { operation: String },

    #[error("Harness is disabled: {operation} rejected")]
    Disabled { operation: String },

    #[error("Invalid argument: {field} - {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("Intent not found: {intent_id}")]
    IntentNotFound { intent_id: String },

    #[error("Baseline metrics have not been collected")]
    BaselineMissing,

    #[error("Chaos monitoring is already running")]
    MonitoringActive,
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("Report serialization failed: {message}")]
    Serialization { message: String },

    #[error("Report not found: {report_id}")]
    ReportNotFound { report_id: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

impl HarnessError {
    pub(crate) fn not_initialized(operation: &str) -> Self {
        HarnessError::NotInitialized {
            operation: operation.to_string(),
        }
    }

    pub(crate) fn disabled(operation: &str) -> Self {
        HarnessError::Disabled {
            operation: operation.to_string(),
        }
    }

    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        HarnessError::InvalidArgument {
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a lifecycle gate rejection.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            HarnessError::NotInitialized { .. } | HarnessError::Disabled { .. }
        )
    }
}
