//! Synthetic identity cache.
//!
//! Upstream providers see every forwarded request for a given
//! `(provider, model)` scope as coming from the same synthetic end user.
//! Values look like
//!
//! ```text
//! user_<64 lowercase hex>_account__session_<uuid v4>
//! ```
//!
//! # Expiry
//!
//! Entries use sliding expiration: every hit pushes `expires_at` to
//! `now + ttl`. Idle scopes rotate after one TTL; active scopes keep their
//! identity indefinitely. Expired entries are purged by [`IdentityCache::run_cleanup`].
//!
//! # Locking
//!
//! Hits take only the shared lock. Expiry is an atomic so renewal does not
//! need exclusive access. Misses, expired and malformed entries take the
//! exclusive lock and re-check before minting.

use crate::credential::provider_key;
use crate::metrics;
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

const IDENTITY_PREFIX: &str = "user_";
const SESSION_SEPARATOR: &str = "_account__session_";
const DIGEST_HEX_LEN: usize = 64;
const UUID_HYPHENATED_LEN: usize = 36;

/// Default identity lifetime (1 hour).
pub const DEFAULT_IDENTITY_TTL: Duration = Duration::from_secs(3600);

/// Default period between expired-entry sweeps (15 minutes).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(900);

/// Cache scope: one synthetic identity per `(provider, model)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    provider: String,
    model: String,
}

impl ScopeKey {
    /// Build a scope. The provider is normalized; the model is trimmed.
    #[must_use]
    pub fn new(provider: &str, model: &str) -> Self {
        Self {
            provider: provider_key(provider),
            model: model.trim().to_string(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.provider.is_empty() && self.model.is_empty()
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.provider, self.model)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IdentityCacheConfig {
    pub ttl: Duration,
    pub cleanup_interval: Duration,
}

impl Default for IdentityCacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_IDENTITY_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

struct Entry {
    value: String,
    /// Milliseconds since the cache epoch.
    expires_at_ms: AtomicU64,
}

impl Entry {
    fn is_live(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms.load(Ordering::Acquire)
    }
}

/// TTL-bounded scope -> synthetic identity cache.
pub struct IdentityCache {
    entries: RwLock<HashMap<ScopeKey, Entry>>,
    config: IdentityCacheConfig,
    epoch: Instant,
}

impl IdentityCache {
    #[must_use]
    pub fn new(config: IdentityCacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn ttl_ms(&self) -> u64 {
        u64::try_from(self.config.ttl.as_millis()).unwrap_or(u64::MAX)
    }

    /// Return the identity for `scope`, minting a new one if absent, expired
    /// or malformed. A hit renews the entry's expiry.
    ///
    /// An empty scope gets a fresh value that is not cached.
    pub async fn get_or_create(&self, scope: &ScopeKey) -> String {
        if scope.is_empty() {
            metrics::record_identity_lookup("uncached");
            return generate_identity();
        }

        let ttl_ms = self.ttl_ms();

        {
            let entries = self.entries.read().await;
            let now = self.now_ms();
            if let Some(entry) = entries.get(scope) {
                if entry.is_live(now) && is_valid_identity(&entry.value) {
                    entry
                        .expires_at_ms
                        .fetch_max(now.saturating_add(ttl_ms), Ordering::AcqRel);
                    metrics::record_identity_lookup("hit");
                    return entry.value.clone();
                }
            }
        }

        let mut entries = self.entries.write().await;
        let now = self.now_ms();

        // Another task may have minted while we waited for the write lock.
        let result = match entries.get(scope) {
            Some(entry) if entry.is_live(now) && is_valid_identity(&entry.value) => {
                entry
                    .expires_at_ms
                    .fetch_max(now.saturating_add(ttl_ms), Ordering::AcqRel);
                metrics::record_identity_lookup("hit");
                return entry.value.clone();
            }
            Some(entry) if !is_valid_identity(&entry.value) => "invalid",
            Some(_) => "expired",
            None => "miss",
        };

        let value = generate_identity();
        entries.insert(
            scope.clone(),
            Entry {
                value: value.clone(),
                expires_at_ms: AtomicU64::new(now.saturating_add(ttl_ms)),
            },
        );
        metrics::record_identity_lookup(result);
        metrics::set_identity_cache_entries(entries.len());

        debug!(target: "auth.identity", scope = %scope, reason = result, "Minted synthetic identity");
        value
    }

    /// Delete expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let now = self.now_ms();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        metrics::set_identity_cache_entries(entries.len());
        before - entries.len()
    }

    /// Number of cached scopes, including expired entries not yet purged.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Purge expired entries every `cleanup_interval` until cancelled.
    pub async fn run_cleanup(&self, cancel_token: CancellationToken) {
        let period = self.config.cleanup_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);

        info!(
            target: "auth.identity",
            interval_secs = period.as_secs(),
            "Identity cache cleanup started"
        );

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let removed = self.purge_expired().await;
                    if removed > 0 {
                        debug!(target: "auth.identity", removed = removed, "Purged expired identities");
                    }
                }
                () = cancel_token.cancelled() => {
                    info!(target: "auth.identity", "Identity cache cleanup received shutdown signal, exiting");
                    break;
                }
            }
        }
    }

    #[cfg(test)]
    async fn insert_raw(&self, scope: ScopeKey, value: &str) {
        let expires = self.now_ms().saturating_add(self.ttl_ms());
        self.entries.write().await.insert(
            scope,
            Entry {
                value: value.to_string(),
                expires_at_ms: AtomicU64::new(expires),
            },
        );
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new(IdentityCacheConfig::default())
    }
}

/// Mint a well-formed synthetic identity.
#[must_use]
pub fn generate_identity() -> String {
    let mut seed = [0u8; 32];
    if SystemRandom::new().fill(&mut seed).is_err() {
        // OS RNG unavailable; v4 UUIDs are still random.
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for (dst, src) in seed
            .iter_mut()
            .zip(a.as_bytes().iter().chain(b.as_bytes().iter()))
        {
            *dst = *src;
        }
    }

    let hash = digest(&SHA256, &seed);
    format!(
        "{IDENTITY_PREFIX}{}{SESSION_SEPARATOR}{}",
        hex::encode(hash.as_ref()),
        Uuid::new_v4()
    )
}

/// Check that `value` matches the synthetic identity format exactly.
#[must_use]
pub fn is_valid_identity(value: &str) -> bool {
    let Some(rest) = value.strip_prefix(IDENTITY_PREFIX) else {
        return false;
    };
    let Some((hash, session)) = rest.split_once(SESSION_SEPARATOR) else {
        return false;
    };

    hash.len() == DIGEST_HEX_LEN
        && hash.bytes().all(is_lower_hex)
        && session.len() == UUID_HYPHENATED_LEN
        && !session.bytes().any(|b| b.is_ascii_uppercase())
        && Uuid::try_parse(session).is_ok()
}

fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}
