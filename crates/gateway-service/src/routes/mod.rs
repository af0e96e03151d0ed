//! HTTP routes for the gateway.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::errors::GatewayError;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_management_key, ManagementAuthState};
use auth_core::{IdentityCache, Manager};
use axum::{
    http::Uri,
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Credential lifecycle composition root.
    pub manager: Arc<Manager>,

    /// Synthetic identity cache shared with request forwarding.
    pub identity_cache: Arc<IdentityCache>,

    /// Service configuration.
    pub config: Config,

    /// Management key verifier.
    pub management_auth: Arc<ManagementAuthState>,

    /// Root shutdown token; handler work runs under child tokens.
    pub shutdown_token: CancellationToken,
}

/// Build the application routes.
///
/// - `/health` - liveness probe with credential and executor counts
/// - `/metrics` - Prometheus scrape endpoint
/// - `/v0/management/auth-files/force-refresh` - management key required
///   when one is configured
///
/// Requests are traced, time out after 30 seconds and are counted by the
/// HTTP metrics layer.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let management_routes = Router::new()
        .route(
            "/v0/management/auth-files/force-refresh",
            post(handlers::force_refresh),
        )
        .route_layer(middleware::from_fn_with_state(
            state.management_auth.clone(),
            require_management_key,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees every response)
    public_routes
        .merge(metrics_routes)
        .merge(management_routes)
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}

async fn not_found(uri: Uri) -> GatewayError {
    GatewayError::NotFound(uri.path().to_string())
}
