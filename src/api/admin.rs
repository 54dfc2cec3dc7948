//! Admin API handlers for retention cleanup and queue inspection.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppState;
use crate::domain::{AppError, QueueStats, TransferQuery};

/// Default retention when the request omits `keep_last_n`
pub const DEFAULT_KEEP_LAST_N: usize = 10;

/// Request body for scheduling a cleanup run
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CleanupRequest {
    #[serde(default)]
    pub keep_last_n: Option<usize>,
    /// Same textual filters as the transfer listing; pagination fields are ignored
    #[serde(default)]
    pub filters: Option<TransferQuery>,
}

/// Response for a scheduled cleanup run
#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupScheduledResponse {
    pub job_id: String,
    pub keep_last_n: usize,
}

/// Queue a cleanup job
///
/// POST /admin/cleanup
pub async fn schedule_cleanup_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CleanupRequest>,
) -> Result<(StatusCode, Json<CleanupScheduledResponse>), AppError> {
    let keep_last_n = payload.keep_last_n.unwrap_or(DEFAULT_KEEP_LAST_N);
    let filters = payload.filters.as_ref().map(TransferQuery::to_filters).transpose()?;

    let job_id = state.cleanup.schedule(keep_last_n, filters).await?;
    info!(job_id = %job_id, keep_last_n, "Manual cleanup requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(CleanupScheduledResponse { job_id, keep_last_n }),
    ))
}

/// Counters of a named job queue
///
/// GET /admin/queues/{name}
pub async fn queue_stats_handler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<QueueStats>, AppError> {
    let stats = state.queue.stats(&name).await?;
    Ok(Json(stats))
}
