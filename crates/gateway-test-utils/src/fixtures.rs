//! Credential fixtures.

use auth_core::Credential;
use serde_json::{json, Value};

/// OAuth-style credential with token material in metadata.
pub fn oauth_credential(id: &str, provider: &str) -> Credential {
    Credential::new(id, provider)
        .with_metadata("access_token", json!(format!("access-{id}")))
        .with_metadata("refresh_token", json!(format!("refresh-{id}")))
}

/// Credential carrying an explicit refresh interval hint.
pub fn credential_with_interval(id: &str, provider: &str, interval_seconds: u64) -> Credential {
    Credential::new(id, provider).with_metadata(
        auth_core::credential::REFRESH_INTERVAL_KEY,
        Value::from(interval_seconds),
    )
}
