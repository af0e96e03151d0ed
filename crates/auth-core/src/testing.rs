//! Stub collaborators for tests.
//!
//! Enabled for this crate's unit tests and, through the `test-utils` feature,
//! for integration tests in other crates.

#![allow(clippy::missing_panics_doc)]

use crate::credential::Credential;
use crate::error::{ExecutorError, StoreError};
use crate::executor::{
    Executor, ExecutorOptions, ExecutorRequest, ExecutorResponse, StreamResult,
};
use crate::hooks::LifecycleHook;
use crate::store::CredentialStore;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
enum RefreshBehavior {
    /// Set `metadata.refreshed = true`.
    Refresh,
    Fail(String),
    ReturnId(String),
    ReturnProvider(String),
    /// Return the record with `id` and `provider` blanked.
    ClearIdentity,
}

/// Configurable executor stub.
pub struct StubExecutor {
    provider: String,
    behavior: RefreshBehavior,
    supports_refresh: bool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StubExecutor {
    fn with_behavior(provider: &str, behavior: RefreshBehavior) -> Self {
        Self {
            provider: provider.to_string(),
            behavior,
            supports_refresh: true,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Refresh succeeds and sets `metadata.refreshed = true`.
    #[must_use]
    pub fn refreshing(provider: &str) -> Self {
        Self::with_behavior(provider, RefreshBehavior::Refresh)
    }

    /// Refresh fails with `message`.
    #[must_use]
    pub fn failing(provider: &str, message: &str) -> Self {
        Self::with_behavior(provider, RefreshBehavior::Fail(message.to_string()))
    }

    /// Refresh returns a record with a different ID.
    #[must_use]
    pub fn mismatched_id(provider: &str, returned_id: &str) -> Self {
        Self::with_behavior(provider, RefreshBehavior::ReturnId(returned_id.to_string()))
    }

    /// Refresh returns a record with a different provider.
    #[must_use]
    pub fn mismatched_provider(provider: &str, returned_provider: &str) -> Self {
        Self::with_behavior(
            provider,
            RefreshBehavior::ReturnProvider(returned_provider.to_string()),
        )
    }

    /// Refresh returns a record with empty ID and provider.
    #[must_use]
    pub fn clearing_identity(provider: &str) -> Self {
        Self::with_behavior(provider, RefreshBehavior::ClearIdentity)
    }

    /// Executor that cannot refresh (static API keys).
    #[must_use]
    pub fn non_refreshing(provider: &str) -> Self {
        Self {
            supports_refresh: false,
            ..Self::refreshing(provider)
        }
    }

    /// Sleep before answering `refresh`; cancellation interrupts the sleep.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `refresh` calls made.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for StubExecutor {
    fn identifier(&self) -> &str {
        &self.provider
    }

    fn supports_refresh(&self) -> bool {
        self.supports_refresh
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        _credential: &Credential,
        request: ExecutorRequest,
        _options: ExecutorOptions,
    ) -> Result<ExecutorResponse, ExecutorError> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }
        Ok(ExecutorResponse {
            payload: request.payload,
            headers: HashMap::from([("x-model".to_string(), request.model)]),
        })
    }

    async fn execute_stream(
        &self,
        _cancel: &CancellationToken,
        _credential: &Credential,
        request: ExecutorRequest,
        _options: ExecutorOptions,
    ) -> Result<StreamResult, ExecutorError> {
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            for chunk in [Bytes::from_static(b"chunk-1"), request.payload] {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });
        Ok(StreamResult {
            headers: HashMap::new(),
            chunks: rx,
        })
    }

    async fn refresh(
        &self,
        cancel: &CancellationToken,
        mut credential: Credential,
    ) -> Result<Credential, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::select! {
                () = cancel.cancelled() => return Err(ExecutorError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }

        match &self.behavior {
            RefreshBehavior::Refresh => {
                credential
                    .metadata
                    .insert("refreshed".to_string(), Value::Bool(true));
                Ok(credential)
            }
            RefreshBehavior::Fail(message) => Err(ExecutorError::Upstream(message.clone())),
            RefreshBehavior::ReturnId(id) => {
                credential.id.clone_from(id);
                Ok(credential)
            }
            RefreshBehavior::ReturnProvider(provider) => {
                credential.provider.clone_from(provider);
                Ok(credential)
            }
            RefreshBehavior::ClearIdentity => {
                credential.id.clear();
                credential.provider.clear();
                credential
                    .metadata
                    .insert("refreshed".to_string(), Value::Bool(true));
                Ok(credential)
            }
        }
    }
}

/// Executor that records the peak number of simultaneous `refresh` calls.
pub struct ConcurrencyTrackingExecutor {
    provider: String,
    delay: Duration,
    current: AtomicUsize,
    max: AtomicUsize,
    calls: AtomicUsize,
}

impl ConcurrencyTrackingExecutor {
    #[must_use]
    pub fn new(provider: &str, delay: Duration) -> Self {
        Self {
            provider: provider.to_string(),
            delay,
            current: AtomicUsize::new(0),
            max: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for ConcurrencyTrackingExecutor {
    fn identifier(&self) -> &str {
        &self.provider
    }

    async fn execute(
        &self,
        _cancel: &CancellationToken,
        _credential: &Credential,
        _request: ExecutorRequest,
        _options: ExecutorOptions,
    ) -> Result<ExecutorResponse, ExecutorError> {
        Ok(ExecutorResponse::default())
    }

    async fn refresh(
        &self,
        cancel: &CancellationToken,
        credential: Credential,
    ) -> Result<Credential, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);

        let result = tokio::select! {
            () = cancel.cancelled() => Err(ExecutorError::Cancelled),
            () = tokio::time::sleep(self.delay) => Ok(credential),
        };

        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Hook that records every event by credential ID.
#[derive(Default)]
pub struct RecordingHook {
    registered: Mutex<Vec<String>>,
    refreshed: Mutex<Vec<String>>,
    failed: Mutex<Vec<(String, String)>>,
    marked_failed: Mutex<Vec<(String, String)>>,
}

impl RecordingHook {
    pub fn registered(&self) -> Vec<String> {
        self.registered.lock().clone()
    }

    pub fn refreshed(&self) -> Vec<String> {
        self.refreshed.lock().clone()
    }

    /// `(auth_id, error)` pairs.
    pub fn failed(&self) -> Vec<(String, String)> {
        self.failed.lock().clone()
    }

    /// `(auth_id, error)` pairs from `mark_failure`.
    pub fn marked_failed(&self) -> Vec<(String, String)> {
        self.marked_failed.lock().clone()
    }
}

impl LifecycleHook for RecordingHook {
    fn on_registered(&self, credential: &Credential) {
        self.registered.lock().push(credential.id.clone());
    }

    fn on_refreshed(&self, credential: &Credential) {
        self.refreshed.lock().push(credential.id.clone());
    }

    fn on_refresh_failed(&self, credential: &Credential, error: &str) {
        self.failed
            .lock()
            .push((credential.id.clone(), error.to_string()));
    }

    fn on_marked_failed(&self, credential: &Credential, error: &str) {
        self.marked_failed
            .lock()
            .push((credential.id.clone(), error.to_string()));
    }
}

/// Store that keeps the last saved copy of each record.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<HashMap<String, Credential>>,
    saves: AtomicUsize,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<Credential> {
        self.records.lock().get(id).cloned()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.records.lock().remove(id);
        Ok(())
    }
}

/// Store whose saves fail a fixed number of times, or always.
pub struct FailingStore {
    remaining_failures: Option<AtomicUsize>,
    attempts: AtomicUsize,
}

impl FailingStore {
    /// Every save fails.
    #[must_use]
    pub fn always() -> Self {
        Self {
            remaining_failures: None,
            attempts: AtomicUsize::new(0),
        }
    }

    /// The first `n` saves fail, later ones succeed.
    #[must_use]
    pub fn failing_times(n: usize) -> Self {
        Self {
            remaining_failures: Some(AtomicUsize::new(n)),
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for FailingStore {
    async fn save(&self, _credential: &Credential) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let fail = match &self.remaining_failures {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        };
        if fail {
            Err(StoreError::Unavailable("store offline".to_string()))
        } else {
            Ok(())
        }
    }

    async fn delete(&self, _id: &str) -> Result<(), StoreError> {
        Ok(())
    }
}
