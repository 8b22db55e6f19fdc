//! Startup configuration and store selection.
//!
//! Everything here is read once when the process starts. The store implementation is chosen by
//! [`build_store`], so request-time code never branches on configuration.

use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;
use crate::store::{CounterStore, FallbackCounterStore, InMemoryCounterStore, RemoteCounterStore};

/// Environment variable selecting the deployment environment.
pub const ENV_ENVIRONMENT: &str = "GATEKEEPER_ENV";
/// Environment variable holding the remote store base URL.
pub const ENV_STORE_URL: &str = "GATEKEEPER_STORE_URL";
/// Environment variable holding the remote store bearer token.
pub const ENV_STORE_TOKEN: &str = "GATEKEEPER_STORE_TOKEN";
/// Environment variable overriding the remote store request timeout, in milliseconds.
pub const ENV_STORE_TIMEOUT_MS: &str = "GATEKEEPER_STORE_TIMEOUT_MS";

const DEFAULT_STORE_TIMEOUT_MS: u64 = 2_000;

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
}

impl Environment {
    /// `production` and `prod` (any case) select production; everything else is development.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    /// Failure mode used when none is configured explicitly.
    pub fn default_failure_mode(self) -> FailureMode {
        match self {
            Environment::Production => FailureMode::FailLoud,
            Environment::Development => FailureMode::Fallback,
        }
    }
}

/// What a [`FallbackCounterStore`] does when its primary store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Serve the increment from the in-process store and log a warning.
    Fallback,
    /// Return the error so the request fails with a 5xx and the outage is visible.
    FailLoud,
}

/// Connection settings for [`RemoteCounterStore`].
#[derive(Clone, Deserialize)]
pub struct RemoteStoreConfig {
    pub url: String,
    pub token: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}

impl RemoteStoreConfig {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self { url: url.into(), token: token.into(), timeout_ms: DEFAULT_STORE_TIMEOUT_MS }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Keep the token out of logs.
impl fmt::Debug for RemoteStoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStoreConfig")
            .field("url", &self.url)
            .field("token", &"<redacted>")
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Limiter configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimiterConfig {
    #[serde(default)]
    pub environment: Environment,
    /// Remote store; `None` means the in-process store is used.
    #[serde(default)]
    pub remote: Option<RemoteStoreConfig>,
    /// Explicit override of the environment's default failure mode.
    #[serde(default)]
    pub failure_mode: Option<FailureMode>,
}

impl LimiterConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`, which returns the value of a named variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment =
            lookup(ENV_ENVIRONMENT).map(|v| Environment::parse(&v)).unwrap_or_default();

        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let remote = match (non_empty(ENV_STORE_URL), non_empty(ENV_STORE_TOKEN)) {
            (Some(url), Some(token)) => {
                let mut remote = RemoteStoreConfig::new(url.trim(), token.trim());
                if let Some(raw) = non_empty(ENV_STORE_TIMEOUT_MS) {
                    remote.timeout_ms = parse_timeout_ms(&raw)?;
                }
                Some(remote)
            }
            _ => None,
        };

        Ok(Self { environment, remote, failure_mode: None })
    }

    /// Failure mode in effect: the explicit override, else the environment's default.
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode.unwrap_or_else(|| self.environment.default_failure_mode())
    }
}

fn parse_timeout_ms(raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidEnv {
            var: ENV_STORE_TIMEOUT_MS.to_string(),
            reason: "must be > 0".to_string(),
        }),
        Ok(ms) => Ok(ms),
        Err(e) => {
            Err(ConfigError::InvalidEnv { var: ENV_STORE_TIMEOUT_MS.to_string(), reason: e.to_string() })
        }
    }
}

/// Select the counter store for this process.
///
/// With a remote store configured, the remote store is wrapped in a [`FallbackCounterStore`]
/// carrying the configured failure mode. Without one, the in-process store is used directly.
pub fn build_store(config: &LimiterConfig) -> Result<Arc<dyn CounterStore>, ConfigError> {
    match &config.remote {
        Some(remote) => {
            let primary = RemoteCounterStore::new(remote)?;
            info!(
                target: "gatekeeper::config",
                url = %remote.url,
                failure_mode = ?config.failure_mode(),
                "using remote counter store"
            );
            Ok(Arc::new(FallbackCounterStore::new(primary, config.failure_mode())))
        }
        None => {
            info!(target: "gatekeeper::config", "using in-process counter store");
            Ok(Arc::new(InMemoryCounterStore::new()))
        }
    }
}
