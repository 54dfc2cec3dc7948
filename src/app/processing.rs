//! Shared processing steps used by both the queue worker and the
//! synchronous `process` path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, instrument, warn};

use crate::domain::audit::{TRANSFER_FAILED, TRANSFER_PROCESSING, TRANSFER_SUCCESS};
use crate::domain::{AppError, Clock, RandomSource, Transfer, TransferRepository, TransferStatus};

use super::audit::AuditService;

/// Probability that a simulated processing run completes successfully
pub const DEFAULT_SUCCESS_RATE: f64 = 0.9;

/// Simulated processing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessingConfig {
    pub success_rate: f64,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            success_rate: DEFAULT_SUCCESS_RATE,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// Drives a transfer from `PENDING` through `PROCESSING` to an outcome.
pub struct TransferProcessor {
    repo: Arc<dyn TransferRepository>,
    audit: Arc<AuditService>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    config: ProcessingConfig,
}

impl TransferProcessor {
    #[must_use]
    pub fn new(
        repo: Arc<dyn TransferRepository>,
        audit: Arc<AuditService>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        config: ProcessingConfig,
    ) -> Self {
        Self {
            repo,
            audit,
            clock,
            random,
            config,
        }
    }

    /// `PENDING -> PROCESSING`, persisted and audited.
    #[instrument(skip(self, transfer), fields(id = %transfer.id()))]
    pub async fn begin(&self, transfer: &Transfer) -> Result<Transfer, AppError> {
        let mut next = transfer.clone();
        next.transition_to(TransferStatus::Processing, self.clock.now())?;
        let saved = self
            .repo
            .update(transfer.id(), &next)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transfer {} not found", transfer.id())))?;

        self.audit
            .log(
                saved.id(),
                TRANSFER_PROCESSING,
                Some(json!({ "status": transfer.status() })),
                Some(json!({ "status": saved.status() })),
            )
            .await;
        info!(id = %saved.id(), "Transfer processing started");
        Ok(saved)
    }

    /// Wait for the simulated processing latency.
    pub async fn simulate_delay(&self) {
        let delay = self
            .random
            .duration_between(self.config.min_delay, self.config.max_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Resolve a `PROCESSING` transfer to `COMPLETED` or `FAILED`.
    ///
    /// Reloads first; anything no longer `PROCESSING` is left alone and returned as is.
    #[instrument(skip(self))]
    pub async fn resolve(&self, id: &str) -> Result<Transfer, AppError> {
        self.settle(id, None).await
    }

    /// Move a `PROCESSING` transfer to `FAILED` when its run was cut short.
    #[instrument(skip(self))]
    pub async fn abandon(&self, id: &str) -> Result<Transfer, AppError> {
        warn!(id = %id, "Processing interrupted, failing transfer");
        self.settle(id, Some(false)).await
    }

    /// Persist the outcome of a `PROCESSING` transfer, drawing it unless forced.
    async fn settle(&self, id: &str, forced: Option<bool>) -> Result<Transfer, AppError> {
        let current = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transfer {} not found", id)))?;

        if current.status() != TransferStatus::Processing {
            warn!(id = %id, status = %current.status(), "Transfer no longer processing, skipping resolution");
            return Ok(current);
        }

        let succeeded = forced.unwrap_or_else(|| self.random.chance(self.config.success_rate));
        let (target, action) = if succeeded {
            (TransferStatus::Completed, TRANSFER_SUCCESS)
        } else {
            (TransferStatus::Failed, TRANSFER_FAILED)
        };

        let mut next = current.clone();
        next.transition_to(target, self.clock.now())?;
        let saved = self
            .repo
            .update(id, &next)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Transfer {} not found", id)))?;

        self.audit
            .log(
                id,
                action,
                Some(json!({ "status": TransferStatus::Processing })),
                Some(json!({ "status": target })),
            )
            .await;
        info!(id = %id, status = %target, "Transfer processing resolved");
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{
        FixedClock, InMemoryAuditLogStore, InMemoryTransferRepository, ScriptedRandom,
        sample_request, test_epoch,
    };

    struct Fixture {
        repo: Arc<InMemoryTransferRepository>,
        audit_store: Arc<InMemoryAuditLogStore>,
        processor: TransferProcessor,
    }

    fn fixture(random: ScriptedRandom) -> Fixture {
        let repo = Arc::new(InMemoryTransferRepository::new());
        let audit_store = Arc::new(InMemoryAuditLogStore::new());
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(test_epoch()));
        let audit = Arc::new(AuditService::new(audit_store.clone(), clock.clone()));
        let processor = TransferProcessor::new(
            repo.clone(),
            audit,
            clock,
            Arc::new(random),
            ProcessingConfig::default(),
        );
        Fixture {
            repo,
            audit_store,
            processor,
        }
    }

    async fn seed(repo: &InMemoryTransferRepository) -> Transfer {
        let transfer = Transfer::new("t-1".into(), "TRF-1".into(), &sample_request(10000), test_epoch());
        repo.create(&transfer).await.unwrap()
    }

    #[tokio::test]
    async fn test_begin_and_resolve_success() {
        let f = fixture(ScriptedRandom::always_succeed());
        let transfer = seed(&f.repo).await;

        let processing = f.processor.begin(&transfer).await.unwrap();
        assert_eq!(processing.status(), TransferStatus::Processing);

        let done = f.processor.resolve("t-1").await.unwrap();
        assert_eq!(done.status(), TransferStatus::Completed);
        assert_eq!(
            f.audit_store.actions_for("t-1"),
            vec![TRANSFER_PROCESSING, TRANSFER_SUCCESS]
        );
    }

    #[tokio::test]
    async fn test_resolve_failure_outcome() {
        let f = fixture(ScriptedRandom::always_fail());
        let transfer = seed(&f.repo).await;
        f.processor.begin(&transfer).await.unwrap();

        let done = f.processor.resolve("t-1").await.unwrap();
        assert_eq!(done.status(), TransferStatus::Failed);
        let entries = f.audit_store.entries();
        assert_eq!(entries[1].action, TRANSFER_FAILED);
        assert_eq!(entries[1].new_values, Some(json!({"status": "FAILED"})));
    }

    #[tokio::test]
    async fn test_resolve_skips_non_processing() {
        let f = fixture(ScriptedRandom::always_succeed());
        seed(&f.repo).await;

        let unchanged = f.processor.resolve("t-1").await.unwrap();
        assert_eq!(unchanged.status(), TransferStatus::Pending);
        assert!(f.audit_store.entries().is_empty());
    }

    #[tokio::test]
    async fn test_abandon_fails_processing_transfer() {
        let f = fixture(ScriptedRandom::always_succeed());
        let transfer = seed(&f.repo).await;
        f.processor.begin(&transfer).await.unwrap();

        let failed = f.processor.abandon("t-1").await.unwrap();
        assert_eq!(failed.status(), TransferStatus::Failed);
        assert_eq!(
            f.audit_store.actions_for("t-1"),
            vec![TRANSFER_PROCESSING, TRANSFER_FAILED]
        );

        // Already settled: nothing more happens
        let again = f.processor.abandon("t-1").await.unwrap();
        assert_eq!(again.status(), TransferStatus::Failed);
        assert_eq!(f.audit_store.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_begin_on_vanished_row_is_not_found() {
        let f = fixture(ScriptedRandom::always_succeed());
        let transfer = seed(&f.repo).await;
        f.repo.remove("t-1");

        let err = f.processor.begin(&transfer).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_begin_with_stale_copy_conflicts() {
        let f = fixture(ScriptedRandom::always_succeed());
        let transfer = seed(&f.repo).await;
        f.processor.begin(&transfer).await.unwrap();

        // Second delivery holding the pre-processing snapshot loses the race
        let err = f.processor.begin(&transfer).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Database(crate::domain::DatabaseError::VersionConflict(_))
        ));
    }
}
