//! Test server harness for E2E testing
//!
//! Provides `TestGatewayServer` for spawning real gateway instances in tests.
//! Background refresh and identity cleanup are not started; tests drive the
//! manager directly when they need them.

use auth_core::{IdentityCache, Manager};
use gateway_service::config::Config;
use gateway_service::middleware::ManagementAuthState;
use gateway_service::routes::{self, AppState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Management key used by [`TestGatewayServer::spawn_with_management_key`].
pub const TEST_MANAGEMENT_KEY: &str = "test-management-key";

/// Test harness for spawning the gateway in E2E tests.
///
/// # Example
/// ```rust,ignore
/// let server = TestGatewayServer::spawn().await?;
/// server.manager().register_executor(Arc::new(StubExecutor::refreshing("codex")));
///
/// let response = reqwest::Client::new()
///     .post(server.force_refresh_url())
///     .json(&serde_json::json!({ "auth_id": "a1" }))
///     .send()
///     .await?;
/// ```
pub struct TestGatewayServer {
    addr: SocketAddr,
    manager: Arc<Manager>,
    identity_cache: Arc<IdentityCache>,
    config: Config,
    shutdown_token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestGatewayServer {
    /// Spawn a server with default configuration and an empty manager.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(HashMap::new(), None).await
    }

    /// Spawn a server that requires [`TEST_MANAGEMENT_KEY`].
    pub async fn spawn_with_management_key() -> Result<Self, anyhow::Error> {
        let vars = HashMap::from([(
            "MANAGEMENT_KEY".to_string(),
            TEST_MANAGEMENT_KEY.to_string(),
        )]);
        Self::spawn_with(vars, None).await
    }

    /// Spawn a server around a caller-built manager (custom hook or store).
    pub async fn spawn_with_manager(manager: Arc<Manager>) -> Result<Self, anyhow::Error> {
        Self::spawn_with(HashMap::new(), Some(manager)).await
    }

    async fn spawn_with(
        mut vars: HashMap<String, String>,
        manager: Option<Arc<Manager>>,
    ) -> Result<Self, anyhow::Error> {
        vars.insert("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string());
        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let manager =
            manager.unwrap_or_else(|| Arc::new(Manager::new(config.refresh_config())));
        let identity_cache = Arc::new(IdentityCache::new(config.identity_config()));
        let management_auth = Arc::new(
            ManagementAuthState::new(config.management_key.as_ref())
                .map_err(|_| anyhow::anyhow!("Failed to create management key verifier"))?,
        );
        let shutdown_token = CancellationToken::new();

        let state = Arc::new(AppState {
            manager: manager.clone(),
            identity_cache: identity_cache.clone(),
            config: config.clone(),
            management_auth,
            shutdown_token: shutdown_token.clone(),
        });

        // A local recorder handle avoids installing the global recorder once
        // per test server.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let app = routes::build_routes(state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            manager,
            identity_cache,
            config,
            shutdown_token,
            _handle: handle,
        })
    }

    /// Base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// URL of the force-refresh management endpoint.
    pub fn force_refresh_url(&self) -> String {
        format!("{}/v0/management/auth-files/force-refresh", self.url())
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The manager behind the server.
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn identity_cache(&self) -> &Arc<IdentityCache> {
        &self.identity_cache
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Root token handed to request handlers.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown_token
    }
}

impl Drop for TestGatewayServer {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
        self._handle.abort();
    }
}
