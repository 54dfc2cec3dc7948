//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;

use crate::app::AppState;
use crate::domain::{
    AppError, AuditLogEntry, CreateTransferRequest, DatabaseError, ErrorDetail, ErrorResponse,
    HealthResponse, HealthStatus, PaginatedResponse, QueueError, TransferQuery,
    UpdateTransferRequest,
};

use super::response::TransferResponse;

/// Create a transfer. It is priced, stored as `PENDING` and queued for processing.
pub async fn create_transfer_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateTransferRequest>,
) -> Result<(StatusCode, Json<TransferResponse>), AppError> {
    let transfer = state.service.create(&payload).await?;
    Ok((StatusCode::CREATED, Json(transfer.into())))
}

/// List transfers with filters and cursor pagination
pub async fn list_transfers_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TransferQuery>,
) -> Result<Json<PaginatedResponse<TransferResponse>>, AppError> {
    let page = state.service.find_all(&query).await?;
    Ok(Json(page.into()))
}

pub async fn get_transfer_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TransferResponse>, AppError> {
    let transfer = state.service.find_by_id(&id).await?;
    Ok(Json(transfer.into()))
}

/// Change status and/or amount
pub async fn update_transfer_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateTransferRequest>,
) -> Result<Json<TransferResponse>, AppError> {
    let transfer = state.service.update_status(&id, &payload).await?;
    Ok(Json(transfer.into()))
}

/// Start processing immediately; the outcome is resolved in the background.
pub async fn process_transfer_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TransferResponse>, AppError> {
    let transfer = state.service.process_transfer(&id).await?;
    Ok(Json(transfer.into()))
}

pub async fn cancel_transfer_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TransferResponse>, AppError> {
    let transfer = state.service.cancel_transfer(&id).await?;
    Ok(Json(transfer.into()))
}

pub async fn get_audit_logs_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    let logs = state.service.get_audit_logs(&id).await?;
    Ok(Json(logs))
}

/// Detailed health check
pub async fn health_check_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let health = state.service.health_check().await;
    Json(health)
}

/// Kubernetes liveness probe
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe
pub async fn readiness_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    let health = state.service.health_check().await;
    match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Message returned for every infrastructure failure; details only go to the log
const INTERNAL_MESSAGE: &str = "Internal server error";

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_type) = match &self {
            AppError::Database(db_err) => match db_err {
                DatabaseError::Connection(_) => (StatusCode::SERVICE_UNAVAILABLE, "database_error"),
                DatabaseError::Duplicate(_) => (StatusCode::CONFLICT, "duplicate"),
                DatabaseError::VersionConflict(_) => {
                    (StatusCode::CONFLICT, "concurrent_modification")
                }
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            },
            AppError::Queue(queue_err) => match queue_err {
                QueueError::Closed => (StatusCode::SERVICE_UNAVAILABLE, "queue_error"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "queue_error"),
            },
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, "authentication_error"),
            AppError::Authorization(_) => (StatusCode::FORBIDDEN, "authorization_error"),
            AppError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            AppError::NotSupported(_) => (StatusCode::NOT_IMPLEMENTED, "not_supported"),
        };

        let message = if self.is_infrastructure() || status.is_server_error() {
            error!(error_type = %error_type, error = %self, "Server error");
            INTERNAL_MESSAGE.to_string()
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message,
            },
        });

        (status, body).into_response()
    }
}
