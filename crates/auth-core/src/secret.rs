//! Redaction helpers for credential material.
//!
//! Credential metadata carries access tokens, refresh tokens and API keys
//! side by side with harmless hints such as `refresh_interval_seconds`.
//! [`RedactedMetadata`] renders only the keys in `Debug` output, so deriving or
//! hand-writing `Debug` for anything that holds metadata never leaks values
//! through `{:?}` or tracing.
//!
//! Standalone secrets (the management key, upstream client secrets) use
//! [`SecretString`] from the [`secrecy`] crate, re-exported here so every
//! crate in the workspace reaches for the same type.
//!
//! ```rust
//! use auth_core::secret::{ExposeSecret, SecretString};
//!
//! let key = SecretString::from("mgmt-key");
//! assert!(!format!("{key:?}").contains("mgmt-key"));
//! assert_eq!(key.expose_secret(), "mgmt-key");
//! ```

use serde_json::{Map, Value};
use std::fmt;

pub use secrecy::{ExposeSecret, SecretString};

/// `Debug` view of a metadata bag that lists keys and hides values.
pub struct RedactedMetadata<'a>(pub &'a Map<String, Value>);

impl fmt::Debug for RedactedMetadata<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for key in self.0.keys() {
            map.entry(key, &"[REDACTED]");
        }
        map.finish()
    }
}
