//! Credential lifecycle core for the multi-provider AI API gateway.
//!
//! Owns upstream credentials for every provider backend, keeps them fresh
//! through a bounded background scheduler, and hands out stable synthetic
//! identities for forwarded requests.
//!
//! # Components
//!
//! ```text
//! identity  -> executor -> registry -> scheduler -> manager
//! ```
//!
//! - `identity` - TTL-bounded `(provider, model)` -> synthetic user id cache
//! - `executor` - capability interface each provider backend implements
//! - `registry` - authoritative in-memory credential table
//! - `scheduler` - periodic refresh under a global admission gate
//! - `manager` - composition root consumed by request handlers

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

/// Credential record and metadata helpers
pub mod credential;

/// Error taxonomy for registry, store, executor and refresh operations
pub mod error;

/// Executor capability interface and the provider-keyed executor set
pub mod executor;

/// Lifecycle hook observer
pub mod hooks;

/// Synthetic identity cache
pub mod identity;

/// Composition root
pub mod manager;

/// Refresh and identity-cache metrics
pub mod metrics;

/// Authoritative credential registry
pub mod registry;

/// Background refresh scheduler
pub mod scheduler;

/// Redaction helpers for credential material
pub mod secret;

/// Persistence collaborator contract
pub mod store;

/// Stub collaborators for tests
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use credential::{Credential, LastError, RuntimeHandle};
pub use error::{
    ContractField, ExecutorError, ManagerError, RefreshError, RefreshErrorKind, RegistryError,
    StoreError,
};
pub use executor::{
    Executor, ExecutorOptions, ExecutorRequest, ExecutorResponse, ExecutorSet, RawRequest,
    RawResponse, StreamResult,
};
pub use hooks::{LifecycleHook, NoopHook};
pub use identity::{IdentityCache, IdentityCacheConfig, ScopeKey};
pub use manager::Manager;
pub use registry::CredentialRegistry;
pub use scheduler::{RefreshBatch, RefreshConfig, RefreshOutcome, RefreshScheduler};
pub use store::CredentialStore;
