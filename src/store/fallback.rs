use async_trait::async_trait;
use tracing::warn;

use super::{CounterStore, InMemoryCounterStore};
use crate::config::FailureMode;
use crate::error::StoreError;

/// Primary store with a process-local safety net.
///
/// This is the single place where "fail open to local counting" versus "fail loud" is decided;
/// the admission controller propagates whatever this store returns.
#[derive(Debug, Clone)]
pub struct FallbackCounterStore<P> {
    primary: P,
    fallback: InMemoryCounterStore,
    mode: FailureMode,
}

impl<P> FallbackCounterStore<P> {
    pub fn new(primary: P, mode: FailureMode) -> Self {
        Self::with_fallback(primary, InMemoryCounterStore::new(), mode)
    }

    /// Use a specific in-process store as the fallback (e.g. one driven by a manual clock).
    pub fn with_fallback(primary: P, fallback: InMemoryCounterStore, mode: FailureMode) -> Self {
        Self { primary, fallback, mode }
    }

    pub fn fallback(&self) -> &InMemoryCounterStore {
        &self.fallback
    }
}

#[async_trait]
impl<P> CounterStore for FallbackCounterStore<P>
where
    P: CounterStore,
{
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<u64, StoreError> {
        match self.primary.increment(key, ttl_secs).await {
            Ok(total) => Ok(total),
            Err(err) => match self.mode {
                FailureMode::FailLoud => Err(err),
                FailureMode::Fallback => {
                    warn!(
                        target: "gatekeeper::store",
                        key = %key,
                        error = %err,
                        "counter store failed; counting in-process"
                    );
                    self.fallback.increment(key, ttl_secs).await
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Default)]
    struct BrokenStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CounterStore for BrokenStore {
        async fn increment(&self, _key: &str, _ttl_secs: u64) -> Result<u64, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Transport("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn fallback_mode_counts_locally() {
        let primary = Arc::new(BrokenStore::default());
        let store = FallbackCounterStore::new(primary.clone(), FailureMode::Fallback);

        assert_eq!(store.increment("k", 60).await.unwrap(), 1);
        assert_eq!(store.increment("k", 60).await.unwrap(), 2);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 2, "primary is retried every call");
        assert_eq!(store.fallback().get("k").unwrap().count, 2);
    }

    #[tokio::test]
    async fn fail_loud_propagates_unchanged() {
        let store = FallbackCounterStore::new(BrokenStore::default(), FailureMode::FailLoud);
        assert_eq!(
            store.increment("k", 60).await,
            Err(StoreError::Transport("connection refused".into()))
        );
        assert!(store.fallback().is_empty());
    }

    #[tokio::test]
    async fn healthy_primary_bypasses_fallback() {
        let primary = InMemoryCounterStore::new();
        let store = FallbackCounterStore::new(primary.clone(), FailureMode::Fallback);
        store.increment("k", 60).await.unwrap();
        assert_eq!(primary.get("k").unwrap().count, 1);
        assert!(store.fallback().is_empty());
    }
}
