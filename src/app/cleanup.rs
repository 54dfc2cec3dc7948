//! Retention cleanup: keep the newest N matching transfers, delete the rest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::domain::audit::TRANSFER_DELETED_CLEANUP;
use crate::domain::{
    AppError, CleanupJob, CleanupReport, DatabaseError, Job, JobHandler, JobOptions, JobQueue,
    QueueStats, Transfer, TransferFilters, TransferRepository, CLEANUP_QUEUE,
};

use super::audit::AuditService;

/// Audit actor recorded on cleanup deletions
pub const CLEANUP_ACTOR: &str = "system:cleanup";

/// Consumer for `cleanup` jobs
pub struct CleanupWorker {
    repo: Arc<dyn TransferRepository>,
    audit: Arc<AuditService>,
}

impl CleanupWorker {
    #[must_use]
    pub fn new(repo: Arc<dyn TransferRepository>, audit: Arc<AuditService>) -> Self {
        Self { repo, audit }
    }

    /// Delete every matching transfer beyond the newest `keep_last_n`.
    ///
    /// Deletions that went through are kept and audited even when the
    /// batch is only partially applied; that case is reported as
    /// [`DatabaseError::PartialDelete`].
    #[instrument(skip(self, job), fields(keep_last_n = job.keep_last_n))]
    pub async fn run(&self, job: &CleanupJob) -> Result<CleanupReport, AppError> {
        let filters = job.filters.clone().unwrap_or_default();
        let mut matching = self.repo.find_with_filters(&filters).await?;
        let matched = matching.len();

        if matched <= job.keep_last_n {
            info!(matched, "No cleanup needed");
            return Ok(CleanupReport {
                matched,
                deleted: 0,
                kept: matched,
            });
        }

        sort_newest_first(&mut matching);
        let doomed: Vec<Transfer> = matching.split_off(job.keep_last_n);
        let ids: Vec<String> = doomed.iter().map(|t| t.id().to_string()).collect();
        info!(matched, to_delete = ids.len(), "Deleting transfers");

        let deleted = self.repo.delete_many(&ids).await?;

        for transfer in doomed.iter().filter(|t| deleted.iter().any(|id| id == t.id())) {
            self.audit
                .log_as(
                    CLEANUP_ACTOR,
                    transfer.id(),
                    TRANSFER_DELETED_CLEANUP,
                    Some(transfer.snapshot()),
                    None,
                )
                .await;
        }

        if deleted.len() < ids.len() {
            warn!(requested = ids.len(), deleted = deleted.len(), "Cleanup partially applied");
            return Err(DatabaseError::PartialDelete {
                requested: ids.len(),
                deleted: deleted.len(),
            }
            .into());
        }

        info!(deleted = deleted.len(), "Cleanup completed");
        Ok(CleanupReport {
            matched,
            deleted: deleted.len(),
            kept: job.keep_last_n,
        })
    }
}

fn sort_newest_first(transfers: &mut [Transfer]) {
    transfers.sort_by(|a, b| {
        b.created_at()
            .cmp(&a.created_at())
            .then_with(|| b.id().cmp(a.id()))
    });
}

#[async_trait]
impl JobHandler for CleanupWorker {
    async fn handle(&self, job: &Job) -> Result<(), AppError> {
        let payload: CleanupJob = job.decode()?;
        self.run(&payload).await.map(|_| ())
    }
}

/// Schedules cleanup jobs on the queue
pub struct CleanupService {
    queue: Arc<dyn JobQueue>,
}

impl CleanupService {
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Enqueue a cleanup run, returning the job id
    #[instrument(skip(self, filters))]
    pub async fn schedule(
        &self,
        keep_last_n: usize,
        filters: Option<TransferFilters>,
    ) -> Result<String, AppError> {
        let payload = serde_json::to_value(CleanupJob {
            keep_last_n,
            filters: filters.filter(|f| !f.is_empty()),
        })
        .map_err(|e| AppError::Serialization(e.to_string()))?;

        let job_id = self
            .queue
            .enqueue(CLEANUP_QUEUE, payload, JobOptions::cleanup())
            .await?;
        info!(job_id = %job_id, "Cleanup job queued");
        Ok(job_id)
    }

    pub async fn queue_status(&self) -> Result<QueueStats, AppError> {
        self.queue.stats(CLEANUP_QUEUE).await
    }
}

/// Periodic cleanup scheduling
#[derive(Debug, Clone)]
pub struct CleanupSchedulerConfig {
    pub interval: Duration,
    pub keep_last_n: usize,
    pub filters: Option<TransferFilters>,
}

impl Default for CleanupSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(24 * 60 * 60),
            keep_last_n: 10,
            filters: None,
        }
    }
}

/// Enqueue a cleanup job every `interval` until shutdown is signalled.
pub fn spawn_cleanup_scheduler(
    service: Arc<CleanupService>,
    config: CleanupSchedulerConfig,
) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        info!(interval = ?config.interval, keep_last_n = config.keep_last_n, "Starting cleanup scheduler");
        let mut ticker = tokio::time::interval(config.interval);
        // The first tick fires immediately; skip it so startup does not delete anything
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = service.schedule(config.keep_last_n, config.filters.clone()).await {
                        error!(error = ?e, "Failed to schedule cleanup");
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("Cleanup scheduler shutting down");
                    break;
                }
            }
        }
    });

    (handle, shutdown_tx)
}
