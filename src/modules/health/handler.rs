use axum::{extract::State, http::StatusCode, response::Response};
use tracing::warn;

use crate::common::response::ApiResponse;
use crate::state::AppState;

/// Liveness plus a queue store round trip. 503 when the database is
/// unreachable, since nothing can be leased without it.
pub async fn health(State(state): State<AppState>) -> Response {
    match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => ApiResponse::success(&state.config.recorder.worker_id, "ok")
            .with_status(StatusCode::OK),
        Err(e) => {
            warn!("health check failed: {}", e);
            ApiResponse::<()>::error(&format!("queue store unreachable: {}", e))
                .with_status(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// What this worker instance is doing right now.
pub async fn status(State(state): State<AppState>) -> Response {
    ApiResponse::success(state.status.snapshot().await, "Worker status retrieved successfully")
        .with_status(StatusCode::OK)
}
