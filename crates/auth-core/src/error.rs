//! Error types for the credential lifecycle core.
//!
//! Each layer has its own enum. `RefreshError` is the taxonomy surfaced by the
//! force-refresh operation; the HTTP layer maps `RefreshError::kind()` to a
//! status code without matching on individual variants.

use thiserror::Error;

/// Errors from [`crate::registry::CredentialRegistry`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Credential ID was empty or whitespace.
    #[error("credential id is required")]
    EmptyId,

    /// A credential with this ID is already registered.
    #[error("credential already registered: {0}")]
    Duplicate(String),

    /// No credential with this ID exists.
    #[error("credential not found: {0}")]
    NotFound(String),

    /// Update attempted to move a credential to another provider.
    #[error("provider change not allowed for {id}: {from} -> {to}")]
    ProviderChanged {
        id: String,
        from: String,
        to: String,
    },
}

/// Errors from a [`crate::store::CredentialStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing store rejected or failed the write.
    #[error("store write failed: {0}")]
    Write(String),

    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Errors returned by [`crate::executor::Executor`] implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// Upstream call failed. Displayed verbatim so the message reaches the
    /// caller unchanged.
    #[error("{0}")]
    Upstream(String),

    /// The executor does not implement this capability.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// The call observed its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// The call exceeded its deadline.
    #[error("operation timed out")]
    TimedOut,
}

/// Errors from [`crate::manager::Manager`] registry and request-path operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("auth not found")]
    NotFound,

    #[error("executor not registered for provider {0}")]
    ExecutorNotRegistered(String),
}

/// Which side of an executor's returned record disagreed with the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractField {
    Id,
    Provider,
}

impl std::fmt::Display for ContractField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContractField::Id => f.write_str("auth id"),
            ContractField::Provider => f.write_str("provider"),
        }
    }
}

/// Coarse classification of [`RefreshError`] for boundary mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshErrorKind {
    /// Caller supplied bad input or the upstream refused the refresh.
    BadRequest,
    /// Unknown credential.
    NotFound,
    /// Another refresh of the same credential is running.
    Conflict,
    /// Contract violation or persistence failure.
    Internal,
}

/// Failures of a single credential refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    #[error("auth_id is required")]
    MissingId,

    #[error("auth not found")]
    NotFound,

    #[error("provider mismatch")]
    ProviderMismatch,

    #[error("executor not registered")]
    ExecutorNotRegistered,

    #[error("refresh already in progress")]
    InProgress,

    /// `Executor::refresh` failed; the message is passed through unwrapped.
    #[error("{0}")]
    Upstream(String),

    /// Executor returned a record whose ID or provider differs from the input.
    #[error("executor returned mismatched {0}")]
    ContractViolation(ContractField),

    /// The refreshed record could not be committed or mirrored.
    #[error("{0}")]
    Persistence(String),
}

impl RefreshError {
    /// Classify this error for the caller boundary.
    #[must_use]
    pub fn kind(&self) -> RefreshErrorKind {
        match self {
            RefreshError::MissingId
            | RefreshError::ProviderMismatch
            | RefreshError::ExecutorNotRegistered
            | RefreshError::Upstream(_) => RefreshErrorKind::BadRequest,
            RefreshError::NotFound => RefreshErrorKind::NotFound,
            RefreshError::InProgress => RefreshErrorKind::Conflict,
            RefreshError::ContractViolation(_) | RefreshError::Persistence(_) => {
                RefreshErrorKind::Internal
            }
        }
    }
}

impl From<ExecutorError> for RefreshError {
    fn from(err: ExecutorError) -> Self {
        RefreshError::Upstream(err.to_string())
    }
}
