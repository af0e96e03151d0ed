//! Credential record.
//!
//! A [`Credential`] is the stored account/token state for one provider
//! backend. `metadata` is owned by the provider's executor (tokens, expiry
//! hints); the core only reads `refresh_interval_seconds` from it.
//! `runtime` is a transient in-memory handle and is never serialized.

use crate::secret::RedactedMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Metadata key holding the per-record refresh interval hint.
pub const REFRESH_INTERVAL_KEY: &str = "refresh_interval_seconds";

/// Opaque per-credential runtime state owned by an executor.
pub type RuntimeHandle = Arc<dyn Any + Send + Sync>;

/// Most recent failure recorded against a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl LastError {
    #[must_use]
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Stored credential for one provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Unique within the registry.
    pub id: String,

    /// Key into the executor set.
    pub provider: String,

    /// Human-readable label (account email, key alias).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Disabled credentials are never scheduled for refresh.
    #[serde(default)]
    pub disabled: bool,

    /// Provider-owned key-value bag.
    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(skip)]
    pub runtime: Option<RuntimeHandle>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refreshed_at: Option<DateTime<Utc>>,

    /// Unset means due now.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_refresh_after: Option<DateTime<Utc>>,

    /// Unset when healthy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Credential {
    /// Create a credential with empty metadata, due for refresh immediately.
    #[must_use]
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            provider: provider.into(),
            label: None,
            disabled: false,
            metadata: Map::new(),
            runtime: None,
            last_refreshed_at: None,
            next_refresh_after: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Whether the scheduler should refresh this credential at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.disabled {
            return false;
        }
        self.next_refresh_after.map_or(true, |after| after <= now)
    }

    /// Refresh interval hint from metadata.
    ///
    /// Accepts a positive integer, float, or numeric string. Returns `None`
    /// for anything else, including values too large for a `Duration`, so
    /// the caller falls back to its default.
    #[must_use]
    pub fn refresh_interval(&self) -> Option<Duration> {
        let secs = match self.metadata.get(REFRESH_INTERVAL_KEY)? {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        if secs > 0.0 {
            Duration::try_from_secs_f64(secs).ok()
        } else {
            None
        }
    }

    /// Normalized provider key used for executor lookup.
    #[must_use]
    pub fn provider_key(&self) -> String {
        provider_key(&self.provider)
    }
}

/// Normalize a provider string for executor dispatch.
#[must_use]
pub fn provider_key(provider: &str) -> String {
    provider.trim().to_ascii_lowercase()
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("label", &self.label)
            .field("disabled", &self.disabled)
            .field("metadata", &RedactedMetadata(&self.metadata))
            .field("runtime", &self.runtime.as_ref().map(|_| "<runtime>"))
            .field("last_refreshed_at", &self.last_refreshed_at)
            .field("next_refresh_after", &self.next_refresh_after)
            .field("last_error", &self.last_error)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}
