#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Gatekeeper
//!
//! Fixed-window admission control for async Rust services.
//!
//! For every request the [`AdmissionController`] increments one counter keyed by
//! `{namespace}:{route_class}:{identity}:{window_start}` and compares the result with the
//! policy limit. Counters live behind the [`CounterStore`] trait:
//!
//! - [`InMemoryCounterStore`] for a single process,
//! - [`RemoteCounterStore`] for a shared REST key-value cache,
//! - [`FallbackCounterStore`] to decide once, at startup, whether a failing remote store is
//!   masked by local counting or surfaced as an error.
//!
//! ## Quick Start
//!
//! ```rust
//! use gatekeeper::config::{build_store, LimiterConfig};
//! use gatekeeper::presets::{self, PolicyRegistry};
//! use gatekeeper::AdmissionController;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LimiterConfig::from_lookup(|_| None)?; // or LimiterConfig::from_env()
//! let controller = AdmissionController::new(build_store(&config)?);
//! let registry = PolicyRegistry::with_defaults()?;
//!
//! let decision = controller.check(registry.get(presets::AUTH)?, "login", "203.0.113.7").await?;
//! assert!(decision.allowed);
//! assert_eq!(decision.remaining, 9);
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod headers;
pub mod limiter;
pub mod middleware;
pub mod policy;
pub mod presets;
pub mod store;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{build_store, Environment, FailureMode, LimiterConfig, RemoteStoreConfig};
pub use error::{ConfigError, StoreError};
pub use headers::{attach_headers, RateLimitHeaders};
pub use limiter::{AdmissionController, Decision};
pub use middleware::{AdmissionLayer, AdmissionService, ClientIdentity, IdentityResolver};
pub use policy::Policy;
pub use presets::PolicyRegistry;
pub use store::{CounterStore, FallbackCounterStore, InMemoryCounterStore, RemoteCounterStore};
