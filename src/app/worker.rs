//! Queue consumer for transfer processing jobs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::domain::{
    AppError, Job, JobHandler, TransferProcessingJob, TransferRepository, TransferStatus,
};

use super::processing::TransferProcessor;

/// Handles one `transfer-processing` job per delivery.
///
/// Delivery is at-least-once. A `PENDING` transfer is processed from the
/// start; one still `PROCESSING` (an earlier attempt failed after the
/// transition was stored) goes straight to its outcome. Anything else is
/// treated as already handled. A missing transfer fails the job with
/// `NotFound`, which the queue never retries.
pub struct TransferProcessingWorker {
    repo: Arc<dyn TransferRepository>,
    processor: Arc<TransferProcessor>,
}

impl TransferProcessingWorker {
    #[must_use]
    pub fn new(repo: Arc<dyn TransferRepository>, processor: Arc<TransferProcessor>) -> Self {
        Self { repo, processor }
    }

    #[instrument(skip(self))]
    pub async fn process(&self, transfer_id: &str) -> Result<(), AppError> {
        let transfer = self
            .repo
            .find_by_id(transfer_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transfer {} not found", transfer_id)))?;

        match transfer.status() {
            TransferStatus::Pending => {
                self.processor.begin(&transfer).await?;
                self.processor.simulate_delay().await;
            }
            TransferStatus::Processing => {
                warn!(id = %transfer_id, "Transfer left in PROCESSING, resuming at outcome");
            }
            status => {
                info!(id = %transfer_id, status = %status, "Transfer already handled, skipping");
                return Ok(());
            }
        }

        self.processor.resolve(transfer_id).await?;
        Ok(())
    }
}

#[async_trait]
impl JobHandler for TransferProcessingWorker {
    async fn handle(&self, job: &Job) -> Result<(), AppError> {
        let payload: TransferProcessingJob = job.decode()?;
        self.process(&payload.transfer_id).await
    }
}
