//! Gateway configuration.
//!
//! Configuration is loaded from environment variables. The management key is
//! held as a `SecretString` and redacted in Debug output.

use auth_core::secret::SecretString;
use auth_core::{IdentityCacheConfig, RefreshConfig};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8317";

/// Default scheduler tick period in seconds.
pub const DEFAULT_REFRESH_CHECK_INTERVAL_SECONDS: u64 = 5;

/// Default admission gate size.
pub const DEFAULT_REFRESH_MAX_CONCURRENCY: usize = 4;

/// Upper bound on the admission gate size.
pub const MAX_REFRESH_MAX_CONCURRENCY: usize = 64;

/// Default refresh interval when a credential carries no hint (15 minutes).
pub const DEFAULT_REFRESH_INTERVAL_SECONDS: u64 = 900;

/// Default deadline for one `Executor::refresh` call.
pub const DEFAULT_REFRESH_TIMEOUT_SECONDS: u64 = 30;

/// Default delay before a failed credential is retried.
pub const DEFAULT_REFRESH_FAILURE_BACKOFF_SECONDS: u64 = 30;

/// Default synthetic identity TTL (1 hour).
pub const DEFAULT_IDENTITY_TTL_SECONDS: u64 = 3600;

/// Default identity cleanup period (15 minutes).
pub const DEFAULT_IDENTITY_CLEANUP_INTERVAL_SECONDS: u64 = 900;

/// Upper bound on every duration setting (365 days).
pub const MAX_DURATION_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Gateway configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:8317").
    pub bind_address: String,

    /// Key required on management routes. Unset leaves them open.
    pub management_key: Option<SecretString>,

    pub refresh_check_interval_seconds: u64,

    pub refresh_max_concurrency: usize,

    pub refresh_default_interval_seconds: u64,

    pub refresh_timeout_seconds: u64,

    /// 0 retries a failed credential on the next tick.
    pub refresh_failure_backoff_seconds: u64,

    pub identity_ttl_seconds: u64,

    pub identity_cleanup_interval_seconds: u64,

    /// Seconds to wait after a shutdown signal before stopping (default: 0).
    pub shutdown_drain_seconds: u64,

    pub log_format: LogFormat,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field(
                "management_key",
                &self.management_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "refresh_check_interval_seconds",
                &self.refresh_check_interval_seconds,
            )
            .field("refresh_max_concurrency", &self.refresh_max_concurrency)
            .field(
                "refresh_default_interval_seconds",
                &self.refresh_default_interval_seconds,
            )
            .field("refresh_timeout_seconds", &self.refresh_timeout_seconds)
            .field(
                "refresh_failure_backoff_seconds",
                &self.refresh_failure_backoff_seconds,
            )
            .field("identity_ttl_seconds", &self.identity_ttl_seconds)
            .field(
                "identity_cleanup_interval_seconds",
                &self.identity_cleanup_interval_seconds,
            )
            .field("shutdown_drain_seconds", &self.shutdown_drain_seconds)
            .field("log_format", &self.log_format)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("Invalid refresh concurrency configuration: {0}")]
    InvalidConcurrency(String),

    #[error("Invalid log format: {0}")]
    InvalidLogFormat(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let management_key = vars
            .get("MANAGEMENT_KEY")
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(SecretString::from);

        let refresh_check_interval_seconds = parse_u64(
            vars,
            "REFRESH_CHECK_INTERVAL_SECONDS",
            DEFAULT_REFRESH_CHECK_INTERVAL_SECONDS,
            1,
            MAX_DURATION_SECONDS,
        )?;

        let refresh_max_concurrency = match vars.get("REFRESH_MAX_CONCURRENCY") {
            Some(value_str) => {
                let value: usize = value_str.trim().parse().map_err(|e| {
                    ConfigError::InvalidConcurrency(format!(
                        "REFRESH_MAX_CONCURRENCY must be a valid positive integer, got '{value_str}': {e}"
                    ))
                })?;
                if value == 0 || value > MAX_REFRESH_MAX_CONCURRENCY {
                    return Err(ConfigError::InvalidConcurrency(format!(
                        "REFRESH_MAX_CONCURRENCY must be between 1 and {MAX_REFRESH_MAX_CONCURRENCY}, got {value}"
                    )));
                }
                value
            }
            None => DEFAULT_REFRESH_MAX_CONCURRENCY,
        };

        let refresh_default_interval_seconds = parse_u64(
            vars,
            "REFRESH_DEFAULT_INTERVAL_SECONDS",
            DEFAULT_REFRESH_INTERVAL_SECONDS,
            1,
            MAX_DURATION_SECONDS,
        )?;
        let refresh_timeout_seconds = parse_u64(
            vars,
            "REFRESH_TIMEOUT_SECONDS",
            DEFAULT_REFRESH_TIMEOUT_SECONDS,
            1,
            MAX_DURATION_SECONDS,
        )?;
        let refresh_failure_backoff_seconds = parse_u64(
            vars,
            "REFRESH_FAILURE_BACKOFF_SECONDS",
            DEFAULT_REFRESH_FAILURE_BACKOFF_SECONDS,
            0,
            MAX_DURATION_SECONDS,
        )?;
        let identity_ttl_seconds = parse_u64(
            vars,
            "IDENTITY_TTL_SECONDS",
            DEFAULT_IDENTITY_TTL_SECONDS,
            1,
            MAX_DURATION_SECONDS,
        )?;
        let identity_cleanup_interval_seconds = parse_u64(
            vars,
            "IDENTITY_CLEANUP_INTERVAL_SECONDS",
            DEFAULT_IDENTITY_CLEANUP_INTERVAL_SECONDS,
            1,
            MAX_DURATION_SECONDS,
        )?;
        let shutdown_drain_seconds =
            parse_u64(vars, "SHUTDOWN_DRAIN_SECONDS", 0, 0, MAX_DURATION_SECONDS)?;

        let log_format = match vars.get("LOG_FORMAT").map(|v| v.trim().to_ascii_lowercase()) {
            None => LogFormat::Text,
            Some(v) if v.is_empty() || v == "text" => LogFormat::Text,
            Some(v) if v == "json" => LogFormat::Json,
            Some(other) => return Err(ConfigError::InvalidLogFormat(other)),
        };

        Ok(Config {
            bind_address,
            management_key,
            refresh_check_interval_seconds,
            refresh_max_concurrency,
            refresh_default_interval_seconds,
            refresh_timeout_seconds,
            refresh_failure_backoff_seconds,
            identity_ttl_seconds,
            identity_cleanup_interval_seconds,
            shutdown_drain_seconds,
            log_format,
        })
    }

    /// Scheduler settings derived from this configuration.
    #[must_use]
    pub fn refresh_config(&self) -> RefreshConfig {
        RefreshConfig {
            max_concurrency: self.refresh_max_concurrency,
            check_interval: Duration::from_secs(self.refresh_check_interval_seconds),
            default_refresh_interval: Duration::from_secs(self.refresh_default_interval_seconds),
            refresh_timeout: Duration::from_secs(self.refresh_timeout_seconds),
            failure_backoff: Duration::from_secs(self.refresh_failure_backoff_seconds),
        }
    }

    #[must_use]
    pub fn identity_config(&self) -> IdentityCacheConfig {
        IdentityCacheConfig {
            ttl: Duration::from_secs(self.identity_ttl_seconds),
            cleanup_interval: Duration::from_secs(self.identity_cleanup_interval_seconds),
        }
    }
}

fn parse_u64(
    vars: &HashMap<String, String>,
    name: &'static str,
    default: u64,
    min: u64,
    max: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str
        .trim()
        .parse()
        .map_err(|e| ConfigError::InvalidValue {
            name,
            reason: format!("must be a non-negative integer, got '{value_str}': {e}"),
        })?;

    if value < min {
        return Err(ConfigError::InvalidValue {
            name,
            reason: format!("must be at least {min}, got {value}"),
        });
    }
    if value > max {
        return Err(ConfigError::InvalidValue {
            name,
            reason: format!("must be at most {max}, got {value}"),
        });
    }
    Ok(value)
}
