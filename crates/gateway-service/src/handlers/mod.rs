//! HTTP request handlers for the gateway.

pub mod force_refresh;
pub mod health;
pub mod metrics;

pub use force_refresh::force_refresh;
pub use health::health_check;
pub use metrics::metrics_handler;
