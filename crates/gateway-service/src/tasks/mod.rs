//! Background tasks for the gateway.
//!
//! - refresh scheduler: periodic credential refresh under the admission gate
//! - identity cleanup: periodic purge of expired synthetic identities
//!
//! Both stop when the root cancellation token fires. In-flight refreshes
//! observe the same token through child tokens and abort cooperatively.

use auth_core::{IdentityCache, Manager};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

/// Spawn the credential refresh loop.
pub fn start_refresh_scheduler(
    manager: Arc<Manager>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            manager.run_auto_refresh(cancel_token).await;
            info!(target: "gateway.tasks", "Credential refresh scheduler stopped");
        }
        .instrument(tracing::info_span!("gateway.task.refresh_scheduler")),
    )
}

/// Spawn the identity cache cleanup loop.
pub fn start_identity_cleanup(
    identity_cache: Arc<IdentityCache>,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            info!(target: "gateway.tasks", "Starting identity cache cleanup");
            identity_cache.run_cleanup(cancel_token).await;
            info!(target: "gateway.tasks", "Identity cache cleanup stopped");
        }
        .instrument(tracing::info_span!("gateway.task.identity_cleanup")),
    )
}
