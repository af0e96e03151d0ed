//! Gateway service library.
//!
//! HTTP shell around `auth-core`: configuration, the management surface for
//! credential refresh, health and metrics endpoints, and the background
//! tasks that keep credentials and synthetic identities current.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> auth_core::Manager
//!                                 -> auth_core::IdentityCache
//! ```
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Management key check and HTTP metrics
//! - `models` - Request and response bodies
//! - `observability` - Prometheus recorder and gateway metrics
//! - `routes` - Axum router setup
//! - `tasks` - Background refresh and cleanup loops

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod tasks;
