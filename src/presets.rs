//! Named policy presets.
//!
//! Route wiring picks a policy by name instead of re-declaring thresholds at every call site.
//! The registry is built once at startup and is read-only afterwards.
//!
//! ## Built-in presets
//!
//! | Name | Limit | Window | Use |
//! |---|---|---|---|
//! | [`API`] | 60 | 60s | General API traffic |
//! | [`AUTH`] | 10 | 60s | Sign-in, sign-up, password reset (blunts credential stuffing) |
//! | [`CHAT`] | 30 | 60s | Bursty conversational endpoints |
//! | [`WEBHOOK`] | 200 | 60s | Inbound webhook deliveries and their retries |
//!
//! ```rust
//! use gatekeeper::presets::{self, PolicyRegistry};
//! use gatekeeper::Policy;
//!
//! # fn main() -> Result<(), gatekeeper::ConfigError> {
//! let registry = PolicyRegistry::builder()
//!     .with_defaults()?
//!     .preset("uploads", Policy::new(5, 300, "uploads")?)
//!     .build();
//!
//! assert_eq!(registry.get(presets::AUTH)?.limit(), 10);
//! assert_eq!(registry.get("uploads")?.window_seconds(), 300);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;

use crate::error::ConfigError;
use crate::policy::{Policy, PolicyEntry};
use tracing::warn;

/// General API traffic.
pub const API: &str = "api";
/// Authentication endpoints.
pub const AUTH: &str = "auth";
/// Chat-style bursty endpoints.
pub const CHAT: &str = "chat";
/// Webhook delivery.
pub const WEBHOOK: &str = "webhook";

const DEFAULT_WINDOW_SECS: u64 = 60;
const DEFAULT_LIMIT_API: u64 = 60;
const DEFAULT_LIMIT_AUTH: u64 = 10;
const DEFAULT_LIMIT_CHAT: u64 = 30;
const DEFAULT_LIMIT_WEBHOOK: u64 = 200;

/// Read-only table of named policies.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<String, Policy>,
}

impl PolicyRegistry {
    /// Start building a registry.
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    /// Registry containing only the built-in presets.
    pub fn with_defaults() -> Result<Self, ConfigError> {
        Ok(Self::builder().with_defaults()?.build())
    }

    /// Look up a policy by name. An unknown name is a wiring mistake, so callers should resolve
    /// every name they need at startup.
    pub fn get(&self, name: &str) -> Result<&Policy, ConfigError> {
        self.policies.get(name).ok_or_else(|| ConfigError::UnknownPreset { name: name.to_string() })
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

/// Builder for [`PolicyRegistry`].
#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
    policies: HashMap<String, Policy>,
}

impl PolicyRegistryBuilder {
    /// Add the built-in presets.
    pub fn with_defaults(self) -> Result<Self, ConfigError> {
        Ok(self
            .preset(API, Policy::new(DEFAULT_LIMIT_API, DEFAULT_WINDOW_SECS, API)?)
            .preset(AUTH, Policy::new(DEFAULT_LIMIT_AUTH, DEFAULT_WINDOW_SECS, AUTH)?)
            .preset(CHAT, Policy::new(DEFAULT_LIMIT_CHAT, DEFAULT_WINDOW_SECS, CHAT)?)
            .preset(WEBHOOK, Policy::new(DEFAULT_LIMIT_WEBHOOK, DEFAULT_WINDOW_SECS, WEBHOOK)?))
    }

    /// Register `policy` under `name`. Last registration wins.
    pub fn preset(mut self, name: impl Into<String>, policy: Policy) -> Self {
        let name = name.into();
        if self.policies.contains_key(&name) {
            warn!(target: "gatekeeper::presets", name = %name, "policy preset replaced; last registration wins");
        }
        self.policies.insert(name, policy);
        self
    }

    /// Register policies read from a configuration file, validating each one.
    pub fn entries<I, N>(mut self, entries: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (N, PolicyEntry)>,
        N: Into<String>,
    {
        for (name, entry) in entries {
            self = self.preset(name, Policy::try_from(entry)?);
        }
        Ok(self)
    }

    pub fn build(self) -> PolicyRegistry {
        PolicyRegistry { policies: self.policies }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::writer::BoxMakeWriter;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl<'a> MakeWriter<'a> for SharedWriter {
        type Writer = SharedGuard;
        fn make_writer(&'a self) -> Self::Writer {
            SharedGuard(self.0.clone())
        }
    }

    struct SharedGuard(Arc<Mutex<Vec<u8>>>);
    impl std::io::Write for SharedGuard {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn defaults_are_registered() {
        let registry = PolicyRegistry::with_defaults().unwrap();
        assert_eq!(registry.names(), vec![API, AUTH, CHAT, WEBHOOK]);

        let auth = registry.get(AUTH).unwrap();
        let api = registry.get(API).unwrap();
        assert!(auth.limit() < api.limit(), "auth budget should be tighter than general traffic");
        assert_eq!(api.namespace(), API);
    }

    #[test]
    fn unknown_preset_is_config_error() {
        let registry = PolicyRegistry::with_defaults().unwrap();
        assert_eq!(
            registry.get("nope").unwrap_err(),
            ConfigError::UnknownPreset { name: "nope".into() }
        );
    }

    #[test]
    fn entries_from_config_are_validated() {
        let entries: HashMap<String, PolicyEntry> = serde_json::from_str(
            r#"{"exports": {"limit": 2, "window_seconds": 3600, "namespace": "exports"}}"#,
        )
        .unwrap();
        let registry = PolicyRegistry::builder().entries(entries).unwrap().build();
        assert_eq!(registry.get("exports").unwrap().window_seconds(), 3600);

        let bad = vec![("broken", PolicyEntry { limit: 0, window_seconds: 60, namespace: "x".into() })];
        assert_eq!(
            PolicyRegistry::builder().entries(bad).unwrap_err(),
            ConfigError::InvalidLimit { provided: 0 }
        );
    }

    #[test]
    fn duplicate_registration_warns_and_replaces() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let subscriber = tracing_subscriber::fmt()
            .with_writer(BoxMakeWriter::new(SharedWriter(buffer.clone())))
            .with_target(true)
            .without_time()
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let registry = PolicyRegistry::builder()
            .with_defaults()
            .unwrap()
            .preset(AUTH, Policy::new(3, 30, "auth").unwrap())
            .build();

        assert_eq!(registry.get(AUTH).unwrap().limit(), 3);
        assert_eq!(registry.len(), 4);

        let logs = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("policy preset replaced"));
    }
}
