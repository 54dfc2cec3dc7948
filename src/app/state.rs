//! Application state management.

use std::sync::Arc;

use secrecy::SecretString;

use crate::domain::{
    AuditLogStore, CLEANUP_QUEUE, Clock, JobQueue, RandomSource, TRANSFER_PROCESSING_QUEUE,
    TransferRepository,
};
use crate::infra::runtime::{SystemClock, ThreadRandom};

use super::audit::AuditService;
use super::cleanup::{CleanupService, CleanupWorker};
use super::executor::BackgroundExecutor;
use super::processing::{ProcessingConfig, TransferProcessor};
use super::service::TransferService;
use super::worker::TransferProcessingWorker;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<TransferService>,
    pub cleanup: Arc<CleanupService>,
    pub repo: Arc<dyn TransferRepository>,
    pub queue: Arc<dyn JobQueue>,
    /// Key expected in the `x-api-key` header; every protected route is
    /// refused while unset
    pub api_key: Option<SecretString>,
}

impl AppState {
    /// Wire the application with the system clock and thread-local randomness
    #[must_use]
    pub fn new(
        repo: Arc<dyn TransferRepository>,
        audit_store: Arc<dyn AuditLogStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self::with_runtime(
            repo,
            audit_store,
            queue,
            Arc::new(SystemClock),
            Arc::new(ThreadRandom),
            ProcessingConfig::default(),
        )
    }

    /// Wire the application and register both job consumers on `queue`
    #[must_use]
    pub fn with_runtime(
        repo: Arc<dyn TransferRepository>,
        audit_store: Arc<dyn AuditLogStore>,
        queue: Arc<dyn JobQueue>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        config: ProcessingConfig,
    ) -> Self {
        let audit = Arc::new(AuditService::new(audit_store, Arc::clone(&clock)));
        let processor = Arc::new(TransferProcessor::new(
            Arc::clone(&repo),
            Arc::clone(&audit),
            Arc::clone(&clock),
            Arc::clone(&random),
            config,
        ));

        queue.on_job(
            TRANSFER_PROCESSING_QUEUE,
            Arc::new(TransferProcessingWorker::new(
                Arc::clone(&repo),
                Arc::clone(&processor),
            )),
        );
        queue.on_job(
            CLEANUP_QUEUE,
            Arc::new(CleanupWorker::new(Arc::clone(&repo), Arc::clone(&audit))),
        );

        let service = Arc::new(TransferService::new(
            Arc::clone(&repo),
            audit,
            Arc::clone(&queue),
            processor,
            BackgroundExecutor::new(),
            clock,
            random,
        ));
        let cleanup = Arc::new(CleanupService::new(Arc::clone(&queue)));

        Self {
            service,
            cleanup,
            repo,
            queue,
            api_key: None,
        }
    }

    /// Require this key on protected routes (builder pattern)
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::from(api_key.into()));
        self
    }
}
