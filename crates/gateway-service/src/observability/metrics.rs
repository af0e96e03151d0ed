//! Prometheus recorder setup and gateway HTTP metrics.
//!
//! # Metric families
//!
//! - `gateway_http_requests_total{method,endpoint,status_code}`
//! - `gateway_http_request_duration_seconds{method,endpoint,status}`
//! - `gateway_force_refresh_total{status}`
//!
//! Endpoint labels are normalized to known routes so that arbitrary request
//! paths cannot grow label cardinality.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Latency buckets for upstream refresh calls (seconds).
const REFRESH_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Latency buckets for gateway HTTP requests (seconds).
const HTTP_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
];

/// Install the global Prometheus recorder.
///
/// Must be called once, before any metric is recorded.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("auth_refresh_duration".to_string()),
            REFRESH_DURATION_BUCKETS,
        )
        .map_err(|e| format!("Failed to set refresh duration buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("gateway_http_request_duration".to_string()),
            HTTP_DURATION_BUCKETS,
        )
        .map_err(|e| format!("Failed to set HTTP duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Record one HTTP request.
pub fn record_http_request(method: &str, path: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(path);
    let status = categorize_status_code(status_code);

    histogram!(
        "gateway_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!(
        "gateway_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Record the outcome of one force-refresh call.
///
/// `status` is `success`, `bad_request`, `not_found`, `conflict` or `error`.
pub fn record_force_refresh(status: &'static str) {
    counter!("gateway_force_refresh_total", "status" => status).increment(1);
}

fn categorize_status_code(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        400..=499 => "client_error",
        _ => "error",
    }
}

fn normalize_endpoint(path: &str) -> &'static str {
    match path {
        "/health" => "/health",
        "/metrics" => "/metrics",
        "/v0/management/auth-files/force-refresh" => "/v0/management/auth-files/force-refresh",
        _ => "/other",
    }
}
