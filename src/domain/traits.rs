//! Domain traits defining contracts for external systems.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::audit::{AuditLogEntry, NewAuditLogEntry};
use super::error::AppError;
use super::jobs::{Job, JobOptions, QueueStats};
use super::transfer::Transfer;
use super::types::{CursorOptions, PaginatedResponse, TransferFilters};

/// Transfer persistence
#[async_trait]
pub trait TransferRepository: Send + Sync {
    /// Check storage connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Insert a new transfer. A taken reference yields `DatabaseError::Duplicate`.
    async fn create(&self, transfer: &Transfer) -> Result<Transfer, AppError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Transfer>, AppError>;

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Transfer>, AppError>;

    /// All transfers, newest first
    async fn find_all(&self) -> Result<Vec<Transfer>, AppError>;

    /// Page through all transfers in ascending id order
    async fn find_with_cursor_pagination(
        &self,
        options: &CursorOptions,
    ) -> Result<PaginatedResponse<Transfer>, AppError> {
        self.find_with_filters_and_cursor_pagination(&TransferFilters::default(), options)
            .await
    }

    /// Transfers matching every present filter, newest first
    async fn find_with_filters(&self, filters: &TransferFilters) -> Result<Vec<Transfer>, AppError>;

    /// Page through matching transfers in ascending id order
    async fn find_with_filters_and_cursor_pagination(
        &self,
        filters: &TransferFilters,
        options: &CursorOptions,
    ) -> Result<PaginatedResponse<Transfer>, AppError>;

    /// Persist a modified transfer if its stored version still equals
    /// `transfer.version()`. Returns `None` when the row no longer exists and
    /// `DatabaseError::VersionConflict` when another writer got there first.
    async fn update(&self, id: &str, transfer: &Transfer) -> Result<Option<Transfer>, AppError>;

    async fn delete(&self, id: &str) -> Result<bool, AppError>;

    /// Delete several transfers, returning the ids actually removed
    async fn delete_many(&self, ids: &[String]) -> Result<Vec<String>, AppError>;
}

/// Append-only audit storage
#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn append(&self, entry: NewAuditLogEntry) -> Result<AuditLogEntry, AppError>;

    /// Entries for one transfer in insertion order
    async fn list_for_transfer(&self, transfer_id: &str) -> Result<Vec<AuditLogEntry>, AppError>;
}

/// Handler invoked for each delivered job
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), AppError>;
}

/// Named job queues with at-least-once delivery
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a payload, returning the job id
    async fn enqueue(&self, queue: &str, payload: Value, options: JobOptions) -> Result<String, AppError>;

    /// Register the consumer for a queue, replacing any previous one
    fn on_job(&self, queue: &str, handler: Arc<dyn JobHandler>);

    async fn stats(&self, queue: &str) -> Result<QueueStats, AppError> {
        let _ = queue;
        Err(AppError::NotSupported("queue stats not implemented".to_string()))
    }
}

/// Time source
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Randomness source
pub trait RandomSource: Send + Sync {
    /// True with probability `p` (clamped to `0..=1`)
    fn chance(&self, p: f64) -> bool;

    /// Uniform duration in `min..=max`
    fn duration_between(&self, min: Duration, max: Duration) -> Duration;

    /// Uppercase alphanumeric string of `len` characters
    fn alphanumeric(&self, len: usize) -> String;
}
