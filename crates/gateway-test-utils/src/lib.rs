//! # Gateway Test Utilities
//!
//! Shared test utilities for the gateway service.
//!
//! - `server_harness` - `TestGatewayServer` for end-to-end tests
//! - `fixtures` - credential builders
//!
//! ## Usage
//!
//! ```rust,ignore
//! use gateway_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestGatewayServer::spawn().await?;
//!     let response = reqwest::get(format!("{}/health", server.url())).await?;
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;

pub use fixtures::*;
pub use server_harness::*;
