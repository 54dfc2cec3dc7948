//! Domain layer containing core business types, traits, and error definitions.

pub mod audit;
pub mod error;
pub mod fee;
pub mod jobs;
pub mod traits;
pub mod transfer;
pub mod types;

pub use audit::{AuditLogEntry, NewAuditLogEntry};
pub use error::{AppError, ConfigError, DatabaseError, QueueError, ValidationError};
pub use fee::{calculate_fee, calculate_total};
pub use jobs::{
    Backoff, CleanupJob, CleanupReport, Job, JobOptions, QueueStats, TransferProcessingJob,
    CLEANUP_QUEUE, TRANSFER_PROCESSING_QUEUE,
};
pub use traits::{AuditLogStore, Clock, JobHandler, JobQueue, RandomSource, TransferRepository};
pub use transfer::{Transfer, TransferRecord};
pub use types::{
    CreateTransferRequest, CursorOptions, ErrorDetail, ErrorResponse, HealthResponse, HealthStatus,
    Metadata, PaginatedResponse, Recipient, TransferFilters, TransferQuery, TransferStatus,
    UpdateTransferRequest,
};
