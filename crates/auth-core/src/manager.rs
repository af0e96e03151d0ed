//! Composition root.
//!
//! [`Manager`] owns the registry, the executor set and the refresh scheduler,
//! and is the only type request handlers and the management API talk to.
//! Background work (`run_auto_refresh`) is started explicitly by the owner
//! with a cancellation token; nothing runs implicitly.

use crate::credential::{Credential, LastError};
use crate::error::{ManagerError, RefreshError, RegistryError};
use crate::executor::{
    Executor, ExecutorOptions, ExecutorRequest, ExecutorResponse, ExecutorSet, RawRequest,
    RawResponse, StreamResult,
};
use crate::hooks::{LifecycleHook, NoopHook};
use crate::registry::CredentialRegistry;
use crate::scheduler::{RefreshBatch, RefreshConfig, RefreshScheduler};
use crate::store::{save_with_retry, CredentialStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub struct Manager {
    registry: Arc<CredentialRegistry>,
    executors: Arc<ExecutorSet>,
    scheduler: RefreshScheduler,
    hook: Arc<dyn LifecycleHook>,
    store: Option<Arc<dyn CredentialStore>>,
}

impl Manager {
    /// Manager with a no-op hook and no durable store.
    #[must_use]
    pub fn new(config: RefreshConfig) -> Self {
        Self::with_collaborators(config, Arc::new(NoopHook), None)
    }

    #[must_use]
    pub fn with_collaborators(
        config: RefreshConfig,
        hook: Arc<dyn LifecycleHook>,
        store: Option<Arc<dyn CredentialStore>>,
    ) -> Self {
        let registry = Arc::new(CredentialRegistry::new());
        let executors = Arc::new(ExecutorSet::new());
        let scheduler = RefreshScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&executors),
            Arc::clone(&hook),
            store.clone(),
            config,
        );
        Self {
            registry,
            executors,
            scheduler,
            hook,
            store,
        }
    }

    #[must_use]
    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }

    /// Register an executor. Last registration per provider wins.
    pub fn register_executor(&self, executor: Arc<dyn Executor>) {
        self.executors.register(executor);
    }

    #[must_use]
    pub fn executor(&self, provider: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(provider)
    }

    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        self.executors.providers()
    }

    /// Add a credential and mirror it to the store.
    ///
    /// A record whose provider has no executor is accepted; the gap surfaces
    /// at use time.
    pub async fn register(&self, credential: Credential) -> Result<Credential, ManagerError> {
        let stored = self.registry.register(credential).await?;

        if self.executors.get(&stored.provider).is_none() {
            warn!(
                target: "auth.manager",
                auth_id = %stored.id,
                provider = %stored.provider,
                "Registered credential has no executor"
            );
        }

        self.mirror(&stored).await?;
        self.hook.on_registered(&stored);
        Ok(stored)
    }

    pub async fn get_by_id(&self, id: &str) -> Option<Credential> {
        self.registry.get(id).await
    }

    pub async fn list_by_provider(&self, provider: &str) -> Vec<Credential> {
        self.registry.list_by_provider(provider).await
    }

    pub async fn list(&self) -> Vec<Credential> {
        self.registry.list().await
    }

    pub async fn len(&self) -> usize {
        self.registry.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.registry.is_empty().await
    }

    /// Replace a credential and mirror it to the store.
    ///
    /// The registry commit stands even if the store write fails.
    pub async fn update(&self, credential: Credential) -> Result<Credential, ManagerError> {
        let committed = self.registry.update(credential).await?;
        self.mirror(&committed).await?;
        Ok(committed)
    }

    /// Remove a credential from the registry and the store.
    pub async fn remove(&self, id: &str) -> Result<Option<Credential>, ManagerError> {
        let removed = self.registry.remove(id).await;
        if removed.is_some() {
            if let Some(store) = &self.store {
                store.delete(id).await?;
            }
        }
        Ok(removed)
    }

    /// Record a request-path failure and make the credential due now.
    ///
    /// The hook sees the marked record once it is committed and mirrored.
    pub async fn mark_failure(&self, id: &str, message: &str) -> Result<Credential, ManagerError> {
        let marked = self
            .registry
            .modify(id, |current| {
                current.last_error = Some(LastError::now(message));
                current.next_refresh_after = None;
            })
            .await
            .map_err(|e| match e {
                RegistryError::NotFound(_) => ManagerError::NotFound,
                other => other.into(),
            })?;

        warn!(target: "auth.manager", auth_id = %id, error = %message, "Credential marked for refresh");
        self.mirror(&marked).await?;
        self.hook.on_marked_failed(&marked, message);
        Ok(marked)
    }

    /// Dispatch a refresh unit for every due record.
    pub async fn check_refreshes(&self, cancel_token: &CancellationToken) -> RefreshBatch {
        self.scheduler.check_refreshes(cancel_token).await
    }

    /// Periodic refresh driver; returns when `cancel_token` fires.
    pub async fn run_auto_refresh(&self, cancel_token: CancellationToken) {
        self.scheduler.run(cancel_token).await;
    }

    /// Refresh one credential now, outside the admission gate.
    #[instrument(skip_all, fields(auth_id = %id))]
    pub async fn force_refresh(
        &self,
        id: &str,
        provider_filter: Option<&str>,
        cancel_token: &CancellationToken,
    ) -> Result<Credential, RefreshError> {
        let refreshed = self
            .scheduler
            .force_refresh(id, provider_filter, cancel_token)
            .await?;
        info!(target: "auth.manager", provider = %refreshed.provider, "Force refresh completed");
        Ok(refreshed)
    }

    pub async fn execute(
        &self,
        cancel_token: &CancellationToken,
        credential: &Credential,
        request: ExecutorRequest,
        options: ExecutorOptions,
    ) -> Result<ExecutorResponse, ManagerError> {
        let executor = self.executor_for(credential)?;
        Ok(executor
            .execute(cancel_token, credential, request, options)
            .await?)
    }

    pub async fn execute_stream(
        &self,
        cancel_token: &CancellationToken,
        credential: &Credential,
        request: ExecutorRequest,
        options: ExecutorOptions,
    ) -> Result<StreamResult, ManagerError> {
        let executor = self.executor_for(credential)?;
        Ok(executor
            .execute_stream(cancel_token, credential, request, options)
            .await?)
    }

    pub async fn count_tokens(
        &self,
        cancel_token: &CancellationToken,
        credential: &Credential,
        request: ExecutorRequest,
        options: ExecutorOptions,
    ) -> Result<ExecutorResponse, ManagerError> {
        let executor = self.executor_for(credential)?;
        Ok(executor
            .count_tokens(cancel_token, credential, request, options)
            .await?)
    }

    pub async fn http_request(
        &self,
        cancel_token: &CancellationToken,
        credential: &Credential,
        request: RawRequest,
    ) -> Result<RawResponse, ManagerError> {
        let executor = self.executor_for(credential)?;
        Ok(executor
            .http_request(cancel_token, credential, request)
            .await?)
    }

    fn executor_for(&self, credential: &Credential) -> Result<Arc<dyn Executor>, ManagerError> {
        self.executors
            .get(&credential.provider)
            .ok_or_else(|| ManagerError::ExecutorNotRegistered(credential.provider.clone()))
    }

    async fn mirror(&self, credential: &Credential) -> Result<(), ManagerError> {
        if let Some(store) = &self.store {
            save_with_retry(store.as_ref(), credential).await?;
        }
        Ok(())
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new(RefreshConfig::default())
    }
}
