use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::trace;

use super::CounterStore;
use crate::clock::{Clock, SystemClock};
use crate::error::StoreError;

/// A counter as held by the in-process store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Increments observed since the counter was created.
    pub count: u64,
    /// Unix second at which the counter is treated as absent.
    pub expires_at: u64,
}

impl Counter {
    fn is_live(&self, now: u64) -> bool {
        now < self.expires_at
    }
}

const DEFAULT_SWEEP_THRESHOLD: usize = 1_024;

#[derive(Debug)]
struct Counters {
    entries: HashMap<String, Counter>,
    /// Entry count at which the next insert first drops expired entries.
    sweep_at: usize,
    min_sweep: usize,
}

impl Counters {
    fn new(min_sweep: usize) -> Self {
        Self { entries: HashMap::new(), sweep_at: min_sweep, min_sweep }
    }

    fn sweep(&mut self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, counter| counter.is_live(now));
        self.sweep_at = self.entries.len().saturating_mul(2).max(self.min_sweep);
        before - self.entries.len()
    }
}

/// Mutex-guarded, process-local counter map.
///
/// Keys are windowed, so a key is rarely touched again once its window ends. Expired entries
/// are dropped in bulk whenever an insert finds the map at its sweep threshold; the threshold
/// then moves to twice the surviving entry count, which keeps the map within about twice the
/// live key count at amortized constant cost per insert.
#[derive(Clone, Debug)]
pub struct InMemoryCounterStore {
    data: Arc<Mutex<Counters>>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that reads expiry time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { data: Arc::new(Mutex::new(Counters::new(DEFAULT_SWEEP_THRESHOLD))), clock }
    }

    /// Smallest entry count that triggers a sweep of expired entries (default 1024, minimum 1).
    pub fn with_sweep_threshold(self, entries: usize) -> Self {
        let entries = entries.max(1);
        {
            let mut counters = self.lock();
            counters.min_sweep = entries;
            counters.sweep_at = entries;
        }
        self
    }

    // Counters are plain integers, so a panic elsewhere cannot leave an entry half-written.
    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Synchronous increment; the whole read-modify-write runs under the lock.
    pub fn increment_sync(&self, key: &str, ttl_secs: u64) -> u64 {
        let now = self.clock.now_unix_secs();
        let mut counters = self.lock();
        if let Some(counter) = counters.entries.get_mut(key) {
            if counter.is_live(now) {
                counter.count += 1;
                return counter.count;
            }
        }
        if counters.entries.len() >= counters.sweep_at {
            let removed = counters.sweep(now);
            if removed > 0 {
                trace!(target: "gatekeeper::store", removed, "swept expired counters");
            }
        }
        counters
            .entries
            .insert(key.to_string(), Counter { count: 1, expires_at: now.saturating_add(ttl_secs) });
        1
    }

    /// Current value of `key`, or `None` if absent or expired.
    pub fn get(&self, key: &str) -> Option<Counter> {
        let now = self.clock.now_unix_secs();
        self.lock().entries.get(key).copied().filter(|c| c.is_live(now))
    }

    /// Drop every expired entry now. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_unix_secs();
        self.lock().sweep(now)
    }

    /// Physical entry count, including expired entries not yet swept.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment(&self, key: &str, ttl_secs: u64) -> Result<u64, StoreError> {
        Ok(self.increment_sync(key, ttl_secs))
    }
}
