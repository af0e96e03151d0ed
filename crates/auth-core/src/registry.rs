//! Authoritative in-memory credential table.
//!
//! Records are stored as `Arc<Credential>` snapshots behind a `tokio::sync::RwLock`.
//! Writers swap whole snapshots, so readers never observe a partially written
//! record, and the exclusive section is a single map insert regardless of
//! which ID is being written.

use crate::credential::{provider_key, Credential};
use crate::error::RegistryError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct Inner {
    records: HashMap<String, Arc<Credential>>,
    /// All IDs in registration order.
    order: Vec<String>,
    /// Normalized provider key -> IDs in registration order.
    by_provider: HashMap<String, Vec<String>>,
}

/// Concurrent credential registry indexed by ID and provider.
#[derive(Default)]
pub struct CredentialRegistry {
    inner: RwLock<Inner>,
}

impl CredentialRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new credential.
    ///
    /// # Errors
    ///
    /// `RegistryError::EmptyId` for a blank ID, `RegistryError::Duplicate` if
    /// the ID is already present.
    pub async fn register(&self, mut credential: Credential) -> Result<Credential, RegistryError> {
        if credential.id.trim().is_empty() {
            return Err(RegistryError::EmptyId);
        }
        credential.updated_at = Utc::now();

        let mut inner = self.inner.write().await;
        if inner.records.contains_key(&credential.id) {
            return Err(RegistryError::Duplicate(credential.id));
        }

        let id = credential.id.clone();
        inner
            .by_provider
            .entry(credential.provider_key())
            .or_default()
            .push(id.clone());
        inner.order.push(id.clone());
        inner.records.insert(id, Arc::new(credential.clone()));

        debug!(
            target: "auth.registry",
            auth_id = %credential.id,
            provider = %credential.provider,
            "Credential registered"
        );
        Ok(credential)
    }

    /// Look up a credential by ID.
    pub async fn get(&self, id: &str) -> Option<Credential> {
        let inner = self.inner.read().await;
        inner.records.get(id).map(|c| Credential::clone(c))
    }

    /// All credentials for a provider, in registration order.
    pub async fn list_by_provider(&self, provider: &str) -> Vec<Credential> {
        let inner = self.inner.read().await;
        inner
            .by_provider
            .get(&provider_key(provider))
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.records.get(id))
                    .map(|c| Credential::clone(c))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All credentials, in registration order.
    pub async fn list(&self) -> Vec<Credential> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .map(|c| Credential::clone(c))
            .collect()
    }

    /// Replace an existing credential with a full copy derived from it.
    ///
    /// `created_at` is preserved, a missing `runtime` is carried over from the
    /// stored record, and `updated_at` is stamped.
    ///
    /// # Errors
    ///
    /// `RegistryError::NotFound` if the record was removed,
    /// `RegistryError::ProviderChanged` if the provider differs.
    pub async fn update(&self, mut credential: Credential) -> Result<Credential, RegistryError> {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner.records.get(&credential.id) else {
            return Err(RegistryError::NotFound(credential.id));
        };

        if existing.provider != credential.provider {
            return Err(RegistryError::ProviderChanged {
                id: credential.id,
                from: existing.provider.clone(),
                to: credential.provider,
            });
        }

        credential.created_at = existing.created_at;
        if credential.runtime.is_none() {
            credential.runtime = existing.runtime.clone();
        }
        credential.updated_at = Utc::now();

        inner
            .records
            .insert(credential.id.clone(), Arc::new(credential.clone()));
        Ok(credential)
    }

    /// Apply `apply` to the stored record in one write-locked step.
    ///
    /// Fields `apply` leaves alone keep whatever value they hold at commit
    /// time. `id`, `provider` and `created_at` cannot be changed here.
    pub async fn modify<F>(&self, id: &str, apply: F) -> Result<Credential, RegistryError>
    where
        F: FnOnce(&mut Credential),
    {
        let mut inner = self.inner.write().await;
        let Some(existing) = inner.records.get(id).map(Arc::clone) else {
            return Err(RegistryError::NotFound(id.to_string()));
        };

        let mut next = Credential::clone(&existing);
        apply(&mut next);
        next.id.clone_from(&existing.id);
        next.provider.clone_from(&existing.provider);
        next.created_at = existing.created_at;
        next.updated_at = Utc::now();

        inner
            .records
            .insert(existing.id.clone(), Arc::new(next.clone()));
        Ok(next)
    }

    /// Remove a credential. Returns the removed record, if any.
    pub async fn remove(&self, id: &str) -> Option<Credential> {
        let mut inner = self.inner.write().await;
        let removed = inner.records.remove(id)?;

        inner.order.retain(|existing| existing != id);
        let key = removed.provider_key();
        if let Some(ids) = inner.by_provider.get_mut(&key) {
            ids.retain(|existing| existing != id);
            if ids.is_empty() {
                inner.by_provider.remove(&key);
            }
        }

        debug!(target: "auth.registry", auth_id = %id, "Credential removed");
        Some(Credential::clone(&removed))
    }

    /// Number of registered credentials.
    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
