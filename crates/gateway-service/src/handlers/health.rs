//! Health check handler.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;
use tracing::instrument;

/// Liveness probe.
///
/// ```json
/// { "status": "healthy", "credentials": 3, "executors": 2 }
/// ```
#[instrument(skip_all, name = "gateway.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        credentials: state.manager.len().await,
        executors: state.manager.providers().len(),
    })
}
