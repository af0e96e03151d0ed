//! Provider executor interface.
//!
//! Each upstream provider backend implements [`Executor`]. The core never
//! inspects an executor's internals; it dispatches by the normalized provider
//! string through an [`ExecutorSet`].

use crate::credential::{provider_key, Credential};
use crate::error::ExecutorError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A translated request ready to send upstream.
#[derive(Debug, Clone, Default)]
pub struct ExecutorRequest {
    pub model: String,
    pub payload: Bytes,
    pub metadata: Map<String, Value>,
}

/// Per-call execution options.
#[derive(Debug, Clone, Default)]
pub struct ExecutorOptions {
    pub stream: bool,
    pub headers: HashMap<String, String>,
}

/// Non-streaming upstream response.
#[derive(Debug, Clone, Default)]
pub struct ExecutorResponse {
    pub payload: Bytes,
    pub headers: HashMap<String, String>,
}

/// Streaming upstream response.
///
/// `chunks` closes when the upstream stream ends. An `Err` item terminates
/// the stream.
#[derive(Debug)]
pub struct StreamResult {
    pub headers: HashMap<String, String>,
    pub chunks: mpsc::Receiver<Result<Bytes, ExecutorError>>,
}

/// Raw HTTP request forwarded with provider credentials attached.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// Capability interface implemented by every provider backend.
///
/// `refresh` takes an owned copy of the credential and returns the updated
/// copy. Implementations must keep `id` and `provider` unchanged; an empty
/// value in either is treated as "unchanged" by the caller.
///
/// All methods observe `cancel` and return [`ExecutorError::Cancelled`] once
/// it fires.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Provider string this executor serves.
    fn identifier(&self) -> &str;

    /// Whether this executor can renew credentials. The scheduler skips
    /// credentials whose executor returns `false`.
    fn supports_refresh(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        credential: &Credential,
        request: ExecutorRequest,
        options: ExecutorOptions,
    ) -> Result<ExecutorResponse, ExecutorError>;

    async fn execute_stream(
        &self,
        _cancel: &CancellationToken,
        _credential: &Credential,
        _request: ExecutorRequest,
        _options: ExecutorOptions,
    ) -> Result<StreamResult, ExecutorError> {
        Err(ExecutorError::NotSupported("execute_stream"))
    }

    /// Renew the credential's upstream tokens.
    async fn refresh(
        &self,
        cancel: &CancellationToken,
        credential: Credential,
    ) -> Result<Credential, ExecutorError>;

    async fn count_tokens(
        &self,
        _cancel: &CancellationToken,
        _credential: &Credential,
        _request: ExecutorRequest,
        _options: ExecutorOptions,
    ) -> Result<ExecutorResponse, ExecutorError> {
        Err(ExecutorError::NotSupported("count_tokens"))
    }

    async fn http_request(
        &self,
        _cancel: &CancellationToken,
        _credential: &Credential,
        _request: RawRequest,
    ) -> Result<RawResponse, ExecutorError> {
        Err(ExecutorError::NotSupported("http_request"))
    }
}

/// Executors keyed by normalized provider string.
#[derive(Default)]
pub struct ExecutorSet {
    executors: RwLock<HashMap<String, Arc<dyn Executor>>>,
}

impl ExecutorSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an executor under its identifier. A later registration for
    /// the same provider replaces the earlier one.
    pub fn register(&self, executor: Arc<dyn Executor>) {
        let key = provider_key(executor.identifier());
        let replaced = self.executors.write().insert(key.clone(), executor).is_some();
        info!(
            target: "auth.executor",
            provider = %key,
            replaced = replaced,
            "Executor registered"
        );
    }

    /// Look up the executor for a provider.
    #[must_use]
    pub fn get(&self, provider: &str) -> Option<Arc<dyn Executor>> {
        self.executors.read().get(&provider_key(provider)).cloned()
    }

    /// Registered provider keys, sorted.
    #[must_use]
    pub fn providers(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.executors.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
