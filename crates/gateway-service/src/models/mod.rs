//! Request and response bodies for the gateway HTTP surface.

use auth_core::Credential;
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    /// Registered credentials.
    pub credentials: usize,
    /// Registered executors.
    pub executors: usize,
}

/// Body of `POST /v0/management/auth-files/force-refresh`.
///
/// Both fields are optional at the wire level; a missing `auth_id` is
/// rejected by the refresh path, a missing `provider` disables the filter.
#[derive(Debug, Default, Deserialize)]
pub struct ForceRefreshRequest {
    #[serde(default)]
    pub auth_id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
}

/// Result of a force-refresh call. Returned for every outcome.
#[derive(Debug, Serialize, Deserialize)]
pub struct ForceRefreshResponse {
    pub auth_id: String,
    pub provider: String,
    pub refreshed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The persisted record, present on success only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Credential>,
}

impl ForceRefreshResponse {
    #[must_use]
    pub fn success(credential: Credential) -> Self {
        Self {
            auth_id: credential.id.clone(),
            provider: credential.provider.clone(),
            refreshed: true,
            error: None,
            auth: Some(credential),
        }
    }

    #[must_use]
    pub fn failure(auth_id: String, provider: String, error: String) -> Self {
        Self {
            auth_id,
            provider,
            refreshed: false,
            error: Some(error),
            auth: None,
        }
    }
}
