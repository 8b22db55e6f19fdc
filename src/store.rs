//! Counter storage for fixed-window admission control.
//!
//! A [`CounterStore`] does one thing: atomically add one to a named counter and return the new
//! value, arranging for the counter to expire `ttl_secs` after it was created.
//!
//! - [`InMemoryCounterStore`]: mutex-guarded map, single process, no external dependency.
//! - [`RemoteCounterStore`]: REST increment/expire protocol against a shared key-value cache,
//!   so several instances enforce one budget.
//! - [`FallbackCounterStore`]: wraps a primary store and decides, once, what happens when it
//!   fails (serve from the in-process map, or propagate the error).

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::StoreError;

pub mod fallback;
pub mod memory;
pub mod remote;

pub use fallback::FallbackCounterStore;
pub use memory::{Counter, InMemoryCounterStore};
pub use remote::RemoteCounterStore;

/// Atomic counter with expiry.
///
/// Implementations must serialize increments to the same key: no two concurrent callers may
/// observe the same post-increment value.
#[async_trait]
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Increment `key` and return its value after this increment.
    ///
    /// When the returned value is 1 the counter was just created and must begin expiring
    /// `ttl_secs` from now.
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<u64, StoreError>;
}

#[async_trait]
impl<T> CounterStore for Arc<T>
where
    T: CounterStore + ?Sized,
{
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<u64, StoreError> {
        (**self).increment(key, ttl_secs).await
    }
}
