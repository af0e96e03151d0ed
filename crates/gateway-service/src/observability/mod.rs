//! Observability for the gateway service.
//!
//! Credential lifecycle metrics are emitted by `auth_core::metrics`; this
//! module installs the Prometheus recorder and adds the HTTP-facing series.

pub mod metrics;
