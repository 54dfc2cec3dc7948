//! Router construction.

use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::app::AppState;

use super::admin::{queue_stats_handler, schedule_cleanup_handler};
use super::auth::require_api_key;
use super::handlers::{
    cancel_transfer_handler, create_transfer_handler, get_audit_logs_handler,
    get_transfer_handler, health_check_handler, list_transfers_handler, liveness_handler,
    process_transfer_handler, readiness_handler, update_transfer_handler,
};

/// Build the application router. Health probes are public; everything
/// else requires the API key.
pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route(
            "/transfers",
            post(create_transfer_handler).get(list_transfers_handler),
        )
        .route(
            "/transfers/{id}",
            get(get_transfer_handler).patch(update_transfer_handler),
        )
        .route("/transfers/{id}/process", post(process_transfer_handler))
        .route("/transfers/{id}/cancel", post(cancel_transfer_handler))
        .route("/transfers/{id}/audit", get(get_audit_logs_handler))
        .route("/admin/cleanup", post(schedule_cleanup_handler))
        .route("/admin/queues/{name}", get(queue_stats_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(health_check_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
