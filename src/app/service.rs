//! Transfer orchestration: validation, fees, persistence, audit and queueing.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::audit::{TRANSFER_CANCELED, TRANSFER_CREATED, TRANSFER_UPDATED};
use crate::domain::types::check_amount;
use crate::domain::{
    AppError, AuditLogEntry, Clock, CreateTransferRequest, DatabaseError, HealthResponse,
    HealthStatus, JobOptions, JobQueue, PaginatedResponse, RandomSource, Transfer,
    TransferProcessingJob, TransferQuery, TransferRepository, TransferStatus,
    UpdateTransferRequest, ValidationError, TRANSFER_PROCESSING_QUEUE,
};

use super::audit::AuditService;
use super::executor::BackgroundExecutor;
use super::processing::TransferProcessor;

/// Attempts at generating an unused reference before giving up
const MAX_REFERENCE_ATTEMPTS: usize = 5;

/// Length of the random part of a generated reference
const REFERENCE_SUFFIX_LEN: usize = 4;

/// Application service containing the transfer lifecycle operations
pub struct TransferService {
    repo: Arc<dyn TransferRepository>,
    audit: Arc<AuditService>,
    queue: Arc<dyn JobQueue>,
    processor: Arc<TransferProcessor>,
    executor: BackgroundExecutor,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl TransferService {
    #[must_use]
    pub fn new(
        repo: Arc<dyn TransferRepository>,
        audit: Arc<AuditService>,
        queue: Arc<dyn JobQueue>,
        processor: Arc<TransferProcessor>,
        executor: BackgroundExecutor,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            repo,
            audit,
            queue,
            processor,
            executor,
            clock,
            random,
        }
    }

    pub fn executor(&self) -> &BackgroundExecutor {
        &self.executor
    }

    /// Validate, price and persist a new `PENDING` transfer, then queue it
    /// for background processing.
    #[instrument(skip(self, request), fields(amount = %request.amount, currency = %request.currency))]
    pub async fn create(&self, request: &CreateTransferRequest) -> Result<Transfer, AppError> {
        request.validate().map_err(|e| {
            warn!(error = %e, "Validation failed");
            AppError::Validation(ValidationError::Multiple(e.to_string()))
        })?;

        let reference = match &request.reference {
            Some(reference) => {
                if self.repo.find_by_reference(reference).await?.is_some() {
                    return Err(AppError::Conflict(format!(
                        "Transfer reference {} already exists",
                        reference
                    )));
                }
                reference.clone()
            }
            None => self.generate_reference().await?,
        };

        let transfer = Transfer::new(
            Uuid::now_v7().to_string(),
            reference,
            request,
            self.clock.now(),
        );
        let created = self.repo.create(&transfer).await.map_err(|e| match e {
            AppError::Database(DatabaseError::Duplicate(detail)) => {
                AppError::Conflict(format!("Transfer already exists: {}", detail))
            }
            other => other,
        })?;

        self.audit
            .log(created.id(), TRANSFER_CREATED, None, Some(created.snapshot()))
            .await;

        self.enqueue_processing(created.id()).await;
        info!(id = %created.id(), reference = %created.reference(), "Transfer created");
        Ok(created)
    }

    /// List transfers matching the query, one cursor page at a time
    #[instrument(skip(self))]
    pub async fn find_all(&self, query: &TransferQuery) -> Result<PaginatedResponse<Transfer>, AppError> {
        let filters = query.to_filters()?;
        let options = query.cursor_options()?;
        self.repo
            .find_with_filters_and_cursor_pagination(&filters, &options)
            .await
    }

    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: &str) -> Result<Transfer, AppError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// Apply a status transition and/or an amount change.
    ///
    /// Nothing is persisted if either part is invalid. Moving a `FAILED`
    /// transfer back to `PENDING` queues it for processing again.
    #[instrument(skip(self, update))]
    pub async fn update_status(&self, id: &str, update: &UpdateTransferRequest) -> Result<Transfer, AppError> {
        if update.status.is_none() && update.amount.is_none() {
            return Err(AppError::Validation(ValidationError::MissingField(
                "status or amount".to_string(),
            )));
        }
        if let Some(amount) = &update.amount {
            check_amount(amount)?;
        }

        let current = self.find_by_id(id).await?;
        let mut next = current.clone();
        let now = self.clock.now();
        if let Some(status) = update.status {
            next.transition_to(status, now)?;
        }
        if let Some(amount) = update.amount {
            next.set_amount(amount, now);
        }

        let saved = self.repo.update(id, &next).await?.ok_or_else(|| not_found(id))?;

        self.audit
            .log(
                id,
                TRANSFER_UPDATED,
                Some(json!({ "status": current.status(), "amount": current.amount() })),
                Some(json!({ "status": saved.status(), "amount": saved.amount() })),
            )
            .await;

        if current.status() == TransferStatus::Failed && saved.status() == TransferStatus::Pending {
            info!(id = %id, "Failed transfer reset to pending, re-queueing");
            self.enqueue_processing(id).await;
        }
        Ok(saved)
    }

    /// Start processing now and resolve the outcome in the background.
    ///
    /// Returns the `PROCESSING` transfer as soon as that state is persisted.
    #[instrument(skip(self))]
    pub async fn process_transfer(&self, id: &str) -> Result<Transfer, AppError> {
        let transfer = self.find_by_id(id).await?;
        if transfer.status() != TransferStatus::Pending {
            return Err(AppError::Conflict(format!(
                "Transfer {} cannot be processed in status {}",
                id,
                transfer.status()
            )));
        }

        let processing = self.processor.begin(&transfer).await?;

        let processor = Arc::clone(&self.processor);
        let transfer_id = id.to_string();
        let fallback_processor = Arc::clone(&self.processor);
        let fallback_id = transfer_id.clone();
        self.executor.spawn_with_fallback(
            "resolve-transfer",
            async move {
                processor.simulate_delay().await;
                if let Err(e) = processor.resolve(&transfer_id).await {
                    error!(id = %transfer_id, error = ?e, "Failed to resolve transfer outcome");
                }
            },
            async move {
                if let Err(e) = fallback_processor.abandon(&fallback_id).await {
                    error!(id = %fallback_id, error = ?e, "Failed to settle interrupted transfer");
                }
            },
        );

        Ok(processing)
    }

    #[instrument(skip(self))]
    pub async fn cancel_transfer(&self, id: &str) -> Result<Transfer, AppError> {
        let transfer = self.find_by_id(id).await?;
        if transfer.status() != TransferStatus::Pending {
            return Err(AppError::Conflict(format!(
                "Transfer {} cannot be cancelled in status {}",
                id,
                transfer.status()
            )));
        }

        let mut next = transfer.clone();
        next.transition_to(TransferStatus::Cancelled, self.clock.now())?;
        let saved = self.repo.update(id, &next).await?.ok_or_else(|| not_found(id))?;

        self.audit
            .log(
                id,
                TRANSFER_CANCELED,
                Some(json!({ "status": TransferStatus::Pending })),
                Some(json!({ "status": TransferStatus::Cancelled })),
            )
            .await;
        info!(id = %id, "Transfer cancelled");
        Ok(saved)
    }

    /// Audit trail of a transfer; still available after the transfer was deleted
    pub async fn get_audit_logs(&self, id: &str) -> Result<Vec<AuditLogEntry>, AppError> {
        self.audit.get_logs_for_transfer(id).await
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthResponse {
        let db_health = match self.repo.health_check().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => {
                warn!(error = ?e, "Database health check failed");
                HealthStatus::Unhealthy
            }
        };
        HealthResponse::new(db_health)
    }

    /// Queue a processing job. The transfer is already stored, so a failure
    /// is logged and the transfer stays `PENDING` for a later `process` call.
    async fn enqueue_processing(&self, id: &str) -> Option<String> {
        match self.try_enqueue_processing(id).await {
            Ok(job_id) => Some(job_id),
            Err(e) => {
                error!(id = %id, error = ?e, "Failed to queue transfer for processing");
                None
            }
        }
    }

    async fn try_enqueue_processing(&self, id: &str) -> Result<String, AppError> {
        let payload = serde_json::to_value(TransferProcessingJob {
            transfer_id: id.to_string(),
        })
        .map_err(|e| AppError::Serialization(e.to_string()))?;
        self.queue
            .enqueue(TRANSFER_PROCESSING_QUEUE, payload, JobOptions::transfer_processing())
            .await
    }

    /// `TRF-YYYYMMDD-XXXX`, retried until unused
    async fn generate_reference(&self) -> Result<String, AppError> {
        let date = self.clock.now().format("%Y%m%d");
        for _ in 0..MAX_REFERENCE_ATTEMPTS {
            let candidate = format!("TRF-{}-{}", date, self.random.alphanumeric(REFERENCE_SUFFIX_LEN));
            if self.repo.find_by_reference(&candidate).await?.is_none() {
                return Ok(candidate);
            }
            warn!(reference = %candidate, "Generated reference already taken, retrying");
        }
        Err(AppError::Conflict(
            "Could not generate a unique transfer reference".to_string(),
        ))
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("Transfer {} not found", id))
}
