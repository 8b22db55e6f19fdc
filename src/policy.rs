//! Fixed-window policy definition.

use crate::error::ConfigError;
use serde::Deserialize;

/// Validated, immutable admission policy.
///
/// A policy allows at most `limit` increments per `window_seconds`-wide fixed window. The
/// `namespace` separates key spaces so unrelated policies never share counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    limit: u64,
    window_seconds: u64,
    namespace: String,
}

impl Policy {
    /// Create a policy, rejecting a zero limit, a zero window, or an unusable namespace.
    pub fn new(
        limit: u64,
        window_seconds: u64,
        namespace: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let namespace = namespace.into();
        if limit == 0 {
            return Err(ConfigError::InvalidLimit { provided: limit });
        }
        if window_seconds == 0 {
            return Err(ConfigError::InvalidWindow { provided: window_seconds });
        }
        if namespace.is_empty() || namespace.contains(':') {
            return Err(ConfigError::InvalidNamespace { namespace });
        }
        Ok(Self { limit, window_seconds, namespace })
    }

    /// Maximum increments allowed per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Width of the fixed window in seconds.
    pub fn window_seconds(&self) -> u64 {
        self.window_seconds
    }

    /// Key-space prefix.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

/// Unvalidated policy as it appears in a host's configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct PolicyEntry {
    pub limit: u64,
    pub window_seconds: u64,
    pub namespace: String,
}

impl TryFrom<PolicyEntry> for Policy {
    type Error = ConfigError;

    fn try_from(entry: PolicyEntry) -> Result<Self, Self::Error> {
        Policy::new(entry.limit, entry.window_seconds, entry.namespace)
    }
}
