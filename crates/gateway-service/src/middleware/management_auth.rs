//! Management key middleware.
//!
//! When a management key is configured, callers must present it either as
//! `Authorization: Bearer <key>` or as `X-Management-Key: <key>`. With no key
//! configured the management routes are open.
//!
//! The expected key is never compared directly: at startup it is signed with
//! a random HMAC key, and presented keys are checked with `hmac::verify`,
//! which compares tags in constant time.

use crate::errors::GatewayError;
use auth_core::secret::{ExposeSecret, SecretString};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use ring::hmac;
use ring::rand::SystemRandom;
use std::sync::Arc;
use tracing::instrument;

/// Header carrying the management key as an alternative to `Authorization`.
pub const MANAGEMENT_KEY_HEADER: &str = "x-management-key";

struct Verifier {
    key: hmac::Key,
    expected_tag: hmac::Tag,
}

/// State for the management key middleware.
#[derive(Clone)]
pub struct ManagementAuthState {
    verifier: Option<Arc<Verifier>>,
}

impl ManagementAuthState {
    /// Build the verifier for `management_key`; `None` leaves the routes open.
    pub fn new(management_key: Option<&SecretString>) -> Result<Self, ring::error::Unspecified> {
        let verifier = match management_key {
            Some(secret) => {
                let rng = SystemRandom::new();
                let key = hmac::Key::generate(hmac::HMAC_SHA256, &rng)?;
                let expected_tag = hmac::sign(&key, secret.expose_secret().as_bytes());
                Some(Arc::new(Verifier { key, expected_tag }))
            }
            None => None,
        };
        Ok(Self { verifier })
    }

    /// Whether a key is required.
    #[must_use]
    pub fn is_enforced(&self) -> bool {
        self.verifier.is_some()
    }

    fn verify(&self, presented: &str) -> bool {
        match &self.verifier {
            Some(verifier) => hmac::verify(
                &verifier.key,
                presented.as_bytes(),
                verifier.expected_tag.as_ref(),
            )
            .is_ok(),
            None => true,
        }
    }
}

fn extract_management_key(req: &Request) -> Option<&str> {
    let headers = req.headers();
    if let Some(bearer) = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(bearer.trim());
    }
    headers
        .get(MANAGEMENT_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
}

/// Reject management requests that do not carry the configured key.
#[instrument(skip_all, name = "gateway.middleware.management_auth")]
pub async fn require_management_key(
    State(state): State<Arc<ManagementAuthState>>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, GatewayError> {
    if state.is_enforced() {
        let presented = extract_management_key(&req).ok_or_else(|| {
            tracing::debug!(target: "gateway.middleware.auth", "Missing management key");
            GatewayError::Unauthorized("Missing management key".to_string())
        })?;

        if !state.verify(presented) {
            tracing::warn!(target: "gateway.middleware.auth", "Invalid management key presented");
            return Err(GatewayError::Unauthorized(
                "Invalid management key".to_string(),
            ));
        }
    }

    Ok(next.run(req).await)
}
