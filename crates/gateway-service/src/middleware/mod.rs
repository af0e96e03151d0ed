//! Middleware for the gateway service.
//!
//! - `management_auth` - management key check for `/v0/management/*`
//! - `http_metrics` - request metrics for every response

pub mod http_metrics;
pub mod management_auth;

pub use http_metrics::http_metrics_middleware;
pub use management_auth::{require_management_key, ManagementAuthState};
