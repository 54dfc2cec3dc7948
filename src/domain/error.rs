//! Error taxonomy shared by every layer.

use thiserror::Error;

use super::types::TransferStatus;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: TransferStatus,
        to: TransferStatus,
    },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Forbidden: {0}")]
    Authorization(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl AppError {
    /// Whether a job that failed with this error may succeed if delivered again.
    ///
    /// Infrastructure failures are transient; caller mistakes and state
    /// conflicts are permanent and must not be retried by the queue.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => !matches!(e, DatabaseError::Duplicate(_) | DatabaseError::Migration(_)),
            Self::Queue(e) => !matches!(e, QueueError::Payload(_)),
            Self::Internal(_) => true,
            _ => false,
        }
    }

    /// Whether this error belongs to the infrastructure class whose details
    /// must not leak to API callers.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        match self {
            Self::Database(DatabaseError::VersionConflict(_)) => false,
            Self::Database(_) | Self::Queue(_) | Self::Internal(_) | Self::Serialization(_) => true,
            _ => false,
        }
    }
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Transfer {0} was modified concurrently")]
    VersionConflict(String),

    #[error("Deleted {deleted} of {requested} transfers")]
    PartialDelete { requested: usize, deleted: usize },
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            _ => Self::Query(err.to_string()),
        }
    }
}

/// Input validation failures
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid filter '{field}': {message}")]
    InvalidFilter { field: String, message: String },

    #[error("{0}")]
    Multiple(String),
}

/// Job queue failures
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("No handler registered for queue '{0}'")]
    UnknownQueue(String),

    #[error("Queue is closed")]
    Closed,

    #[error("Invalid job payload: {0}")]
    Payload(String),
}

/// Configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(String),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}
