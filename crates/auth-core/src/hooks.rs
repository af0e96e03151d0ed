//! Lifecycle hook.
//!
//! Observers notified after registry commits. Hooks run inline on the
//! committing task and must not block.

use crate::credential::Credential;

/// Observer of credential lifecycle events.
pub trait LifecycleHook: Send + Sync {
    /// A credential was added to the registry.
    fn on_registered(&self, _credential: &Credential) {}

    /// A refreshed credential was committed.
    fn on_refreshed(&self, _credential: &Credential) {}

    /// A refresh attempt failed. `credential` is the record as it stood
    /// before the attempt.
    fn on_refresh_failed(&self, _credential: &Credential, _error: &str) {}

    /// A request-path failure was recorded and the credential made due.
    fn on_marked_failed(&self, _credential: &Credential, _error: &str) {}
}

/// Hook that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHook;

impl LifecycleHook for NoopHook {}
