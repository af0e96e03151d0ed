//! Gateway
//!
//! Entry point for the multi-provider AI API gateway credential service.

use auth_core::{IdentityCache, Manager};
use gateway_service::config::Config;
use gateway_service::middleware::ManagementAuthState;
use gateway_service::observability::metrics::init_metrics_recorder;
use gateway_service::routes::{self, AppState};
use gateway_service::tasks;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "gateway_service=debug,auth_core=debug,tower_http=debug";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // LOG_FORMAT is read before Config so that config errors are logged in
    // the requested format.
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v.trim().eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    init_tracing(json_logs);

    info!("Starting gateway");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        management_key_configured = config.management_key.is_some(),
        refresh_max_concurrency = config.refresh_max_concurrency,
        refresh_check_interval_seconds = config.refresh_check_interval_seconds,
        log_format = ?config.log_format,
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics: {}", e);
        e
    })?;

    let manager = Arc::new(Manager::new(config.refresh_config()));
    let identity_cache = Arc::new(IdentityCache::new(config.identity_config()));

    // Provider executors are registered by the embedding deployment; without
    // one a credential is stored but never refreshed.
    if manager.providers().is_empty() {
        warn!("No provider executors registered; background refresh is idle");
    }

    let management_auth = Arc::new(
        ManagementAuthState::new(config.management_key.as_ref()).map_err(|_| {
            error!("Failed to initialize management key verifier");
            "management key verifier initialization failed"
        })?,
    );
    if !management_auth.is_enforced() {
        warn!("MANAGEMENT_KEY not set; management routes are unauthenticated");
    }

    let shutdown_token = CancellationToken::new();

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let drain_seconds = config.shutdown_drain_seconds;

    let state = Arc::new(AppState {
        manager: manager.clone(),
        identity_cache: identity_cache.clone(),
        config,
        management_auth,
        shutdown_token: shutdown_token.clone(),
    });

    let app = routes::build_routes(state, metrics_handle);

    // Bind before spawning background work so a port conflict fails fast.
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind {}: {}", addr, e);
        e
    })?;

    let scheduler_handle = tasks::start_refresh_scheduler(manager, shutdown_token.clone());
    let cleanup_handle = tasks::start_identity_cleanup(identity_cache, shutdown_token.clone());

    info!("Gateway listening on {}", addr);

    let server_token = shutdown_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal(drain_seconds).await;
            server_token.cancel();
        })
        .await?;

    // Covers the server exiting on its own.
    shutdown_token.cancel();

    for (name, handle) in [
        ("refresh scheduler", scheduler_handle),
        ("identity cleanup", cleanup_handle),
    ] {
        if let Err(e) = handle.await {
            warn!("Background task {} ended abnormally: {}", name, e);
        }
    }

    info!("Gateway shutdown complete");

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is complete.
async fn shutdown_signal(drain_seconds: u64) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    if drain_seconds > 0 {
        warn!("Draining connections for {} seconds...", drain_seconds);
        tokio::time::sleep(Duration::from_secs(drain_seconds)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (SHUTDOWN_DRAIN_SECONDS=0)");
    }
}
