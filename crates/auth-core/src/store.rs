//! Persistence collaborator.
//!
//! The registry is authoritative; a [`CredentialStore`] mirrors committed
//! records to durable storage. Writes go through [`save_with_retry`].

use crate::credential::Credential;
use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::warn;

/// Attempts per save before giving up.
pub const SAVE_ATTEMPTS: u32 = 3;

/// Delay before the first retry; doubles on each subsequent retry.
const INITIAL_BACKOFF_MS: u64 = 100;

/// Durable mirror of the credential registry.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Persist the full record, replacing any previous copy.
    async fn save(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Remove a record. Deleting an unknown ID is not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

/// Save with bounded exponential backoff (100ms, 200ms).
///
/// Returns the last error if every attempt fails.
pub async fn save_with_retry(
    store: &dyn CredentialStore,
    credential: &Credential,
) -> Result<(), StoreError> {
    let mut backoff = INITIAL_BACKOFF_MS;
    let mut attempt = 1;

    loop {
        match store.save(credential).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt >= SAVE_ATTEMPTS => return Err(e),
            Err(e) => {
                warn!(
                    target: "auth.store",
                    auth_id = %credential.id,
                    error = %e,
                    attempt = attempt,
                    backoff_ms = backoff,
                    "Credential save failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                backoff *= 2;
                attempt += 1;
            }
        }
    }
}
