//! Time-to-live response cache.
//!
//! Backed by a [`moka`] concurrent cache. Entries carry the instant they were
//! stored and are treated as absent once older than the TTL, whether or not
//! moka has swept them yet. Expired and never-stored keys look the same to
//! callers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;

/// Longest TTL a cache accepts. Longer values are clamped when building the
/// underlying store, which rejects lifetimes beyond 1000 years.
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// A stored value and the moment it was written.
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub value: V,
    pub stored_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

/// Process-wide key → value store with lazy TTL expiry.
///
/// Cheap to clone; clones share the same underlying store.
#[derive(Clone)]
pub struct ResponseCache<V> {
    entries: Cache<String, Arc<CacheEntry<V>>>,
    ttl: Duration,
}

impl<V> ResponseCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Unbounded cache; entries only leave by expiring.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Cache::builder().time_to_live(ttl.min(MAX_TTL)).build(),
            ttl,
        }
    }

    /// Cache that additionally evicts once it holds more than `max_entries` keys.
    pub fn with_capacity(ttl: Duration, max_entries: u64) -> Self {
        Self {
            entries: Cache::builder()
                .time_to_live(ttl.min(MAX_TTL))
                .max_capacity(max_entries)
                .build(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the value stored under `key`, or `None` if absent or expired.
    pub async fn get(&self, key: &str) -> Option<V> {
        let entry = self.entries.get(key).await?;
        if entry.is_fresh(self.ttl) {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub async fn set(&self, key: impl Into<String>, value: V) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
        };
        self.entries.insert(key.into(), Arc::new(entry)).await;
    }

    /// Number of live entries, after flushing pending maintenance.
    pub async fn entry_count(&self) -> u64 {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count()
    }
}
