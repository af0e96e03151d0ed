//! Credential lifecycle metrics.
//!
//! All metrics follow Prometheus naming conventions:
//! - `auth_` prefix for the credential core
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! - `provider`: bounded by registered executors
//! - `status`: success, error, timeout, cancelled
//! - `result`: hit, miss, expired, invalid, uncached
//!
//! Recording is a no-op until a recorder is installed by the binary.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a completed refresh attempt.
pub fn record_refresh(provider: &str, status: &'static str, duration: Duration) {
    counter!(
        "auth_refresh_total",
        "provider" => provider.to_string(),
        "status" => status,
    )
    .increment(1);

    histogram!(
        "auth_refresh_duration_seconds",
        "provider" => provider.to_string(),
        "status" => status,
    )
    .record(duration.as_secs_f64());
}

/// Track refreshes currently holding a concurrency slot.
pub fn set_refresh_in_flight(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("auth_refresh_in_flight").set(count as f64);
}

/// Record an identity cache lookup.
pub fn record_identity_lookup(result: &'static str) {
    counter!("auth_identity_cache_lookups_total", "result" => result).increment(1);
}

pub fn set_identity_cache_entries(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("auth_identity_cache_entries").set(count as f64);
}
