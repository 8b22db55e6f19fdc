//! Error types for admission control.
//!
//! Two families exist and they never mix:
//! - [`ConfigError`] is raised while wiring the limiter at startup. It is never a per-request
//!   condition.
//! - [`StoreError`] is raised by a [`CounterStore`](crate::store::CounterStore) when it cannot
//!   produce a count. Whether it reaches the caller is decided by the store's failure mode.
//!
//! A denied request is not an error; it is a [`Decision`](crate::Decision) with `allowed == false`.

use thiserror::Error;

/// Invalid static configuration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Policy limit must be >= 1.
    #[error("policy limit must be >= 1 (got {provided})")]
    InvalidLimit {
        /// Value provided by caller.
        provided: u64,
    },
    /// Policy window must be >= 1 second.
    #[error("policy window must be >= 1 second (got {provided})")]
    InvalidWindow {
        /// Value provided by caller.
        provided: u64,
    },
    /// Namespace must be non-empty and must not contain the key separator.
    #[error("policy namespace '{namespace}' must be non-empty and must not contain ':'")]
    InvalidNamespace {
        /// Value provided by caller.
        namespace: String,
    },
    /// Route class must be non-empty and must not contain the key separator.
    #[error("route class '{route_class}' must be non-empty and must not contain ':'")]
    InvalidRouteClass {
        /// Value provided by caller.
        route_class: String,
    },
    /// No preset registered under the requested name.
    #[error("unknown policy preset '{name}'")]
    UnknownPreset {
        /// Name that could not be located.
        name: String,
    },
    /// An environment variable held a value that could not be used.
    #[error("invalid value for {var}: {reason}")]
    InvalidEnv {
        /// Variable name.
        var: String,
        /// What was wrong with it.
        reason: String,
    },
    /// The remote store base URL could not be parsed or cannot carry path segments.
    #[error("invalid remote store url '{url}'")]
    InvalidStoreUrl {
        /// URL as configured.
        url: String,
    },
    /// Remote store request timeout must be > 0.
    #[error("remote store timeout must be > 0 ms (got {provided_ms})")]
    InvalidStoreTimeout {
        /// Value provided by caller.
        provided_ms: u64,
    },
    /// The HTTP client for the remote store could not be constructed.
    #[error("failed to build remote store client: {0}")]
    HttpClient(String),
}

/// Failure to increment a counter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached (connect failure, timeout, broken response stream).
    #[error("counter store unreachable: {0}")]
    Transport(String),
    /// The store answered with a non-success HTTP status.
    #[error("counter store returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// The store answered 2xx but the payload was not a counter value.
    #[error("counter store protocol error: {0}")]
    Protocol(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            StoreError::Protocol(err.to_string())
        } else {
            StoreError::Transport(err.to_string())
        }
    }
}
