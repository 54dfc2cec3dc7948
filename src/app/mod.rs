//! Application layer containing business logic and shared state.

pub mod audit;
pub mod cleanup;
pub mod executor;
pub mod processing;
pub mod service;
pub mod state;
pub mod worker;

pub use audit::AuditService;
pub use cleanup::{CLEANUP_ACTOR, CleanupSchedulerConfig, CleanupService, CleanupWorker, spawn_cleanup_scheduler};
pub use executor::BackgroundExecutor;
pub use processing::{DEFAULT_SUCCESS_RATE, ProcessingConfig, TransferProcessor};
pub use service::TransferService;
pub use state::AppState;
pub use worker::TransferProcessingWorker;
