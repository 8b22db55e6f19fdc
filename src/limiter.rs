//! Fixed-window admission decisions.
//!
//! Time is cut into non-overlapping windows aligned to Unix time. The window start is part of
//! the counter key, so a new window is a new key and counters "reset" without any deletion.
//!
//! ```rust
//! use gatekeeper::{AdmissionController, InMemoryCounterStore, ManualClock, Policy};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = ManualClock::new(1_700_000_000);
//! let controller = AdmissionController::with_clock(
//!     Arc::new(InMemoryCounterStore::new()),
//!     Arc::new(clock.clone()),
//! );
//! let policy = Policy::new(2, 60, "api")?;
//!
//! assert!(controller.check(&policy, "default", "1.2.3.4").await?.allowed);
//! assert!(controller.check(&policy, "default", "1.2.3.4").await?.allowed);
//! assert!(!controller.check(&policy, "default", "1.2.3.4").await?.allowed);
//!
//! clock.advance(60);
//! assert_eq!(controller.check(&policy, "default", "1.2.3.4").await?.total, 1);
//! # Ok(())
//! # }
//! ```

use std::borrow::Cow;
use std::sync::Arc;
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, StoreError};
use crate::policy::Policy;
use crate::store::CounterStore;

/// Outcome of one admission check.
///
/// `remaining` and `allowed` are pure functions of `total` and the policy limit, and
/// `reset_at` is the end of the window `total` was counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// Counter value after this check's increment.
    pub total: u64,
    pub remaining: u64,
    /// Unix second at which the current window ends.
    pub reset_at: u64,
}

impl Decision {
    pub fn from_total(limit: u64, total: u64, reset_at: u64) -> Self {
        Self { allowed: total <= limit, total, remaining: limit.saturating_sub(total), reset_at }
    }

    /// Whole seconds from `now` until the window resets.
    pub fn retry_after_secs(&self, now: u64) -> u64 {
        self.reset_at.saturating_sub(now)
    }
}

/// Start of the window containing `now`.
pub fn window_start(now: u64, window_seconds: u64) -> u64 {
    now - now % window_seconds
}

/// Reject route classes that are empty or contain the key separator.
pub fn validate_route_class(route_class: &str) -> Result<(), ConfigError> {
    if route_class.is_empty() || route_class.contains(':') {
        return Err(ConfigError::InvalidRouteClass { route_class: route_class.to_string() });
    }
    Ok(())
}

/// Composite counter key: `{namespace}:{route_class}:{identity}:{window_start}`.
///
/// Namespace and route class never contain `:` and the window start is the last segment, so
/// everything between the second separator and the last one is the identity (IPv6 addresses
/// included). A route class that skipped [`validate_route_class`] has `%` and `:` percent-encoded
/// so it still maps to its own counter.
pub fn counter_key(policy: &Policy, route_class: &str, identity: &str, window_start: u64) -> String {
    let route_class: Cow<'_, str> = if route_class.contains([':', '%']) {
        Cow::Owned(route_class.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(route_class)
    };
    format!("{}:{}:{}:{}", policy.namespace(), route_class, identity, window_start)
}

/// Turns `(policy, route_class, identity)` into a [`Decision`] with exactly one increment.
///
/// Store failures propagate unchanged; whether a failing backend is masked is decided by the
/// store (see [`FallbackCounterStore`](crate::store::FallbackCounterStore)).
#[derive(Clone, Debug)]
pub struct AdmissionController {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Current Unix time as seen by this controller.
    pub fn now(&self) -> u64 {
        self.clock.now_unix_secs()
    }

    pub async fn check(
        &self,
        policy: &Policy,
        route_class: &str,
        identity: &str,
    ) -> Result<Decision, StoreError> {
        self.check_at(policy, route_class, identity, self.now()).await
    }

    /// [`check`](Self::check) against an explicit `now`, for hosts that stamp requests themselves.
    pub async fn check_at(
        &self,
        policy: &Policy,
        route_class: &str,
        identity: &str,
        now: u64,
    ) -> Result<Decision, StoreError> {
        let start = window_start(now, policy.window_seconds());
        let key = counter_key(policy, route_class, identity, start);
        let total = self.store.increment(&key, policy.window_seconds()).await?;
        let decision =
            Decision::from_total(policy.limit(), total, start.saturating_add(policy.window_seconds()));

        if !decision.allowed {
            debug!(
                target: "gatekeeper::limiter",
                namespace = policy.namespace(),
                route_class,
                identity,
                total,
                limit = policy.limit(),
                reset_at = decision.reset_at,
                "admission denied"
            );
        }
        Ok(decision)
    }
}
