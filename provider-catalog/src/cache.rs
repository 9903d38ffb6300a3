//! Response cache for catalog page requests
//!
//! Bounded LRU keyed by request parameters. Entries expire after a fixed TTL
//! measured with an injected [`Clock`]; expired entries are evicted lazily on
//! lookup or by [`ResponseCache::purge_expired`].

use bridge_traits::time::Clock;
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::trace;

/// Cache key derived from one page request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub endpoint: String,
    pub offset: u64,
    pub limit: u32,
    /// Canonical rendering of the filter parameters
    pub filter: String,
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    fetched_at_ms: i64,
}

/// TTL-bounded LRU cache
pub struct ResponseCache<V> {
    entries: Mutex<LruCache<CacheKey, CacheEntry<V>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(capacity: usize, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now_ms: i64) -> bool {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(entry.fetched_at_ms) >= ttl_ms
    }

    /// Returns a fresh payload for `key`, evicting it if it has expired.
    pub async fn get(&self, key: &CacheKey) -> Option<V> {
        let now_ms = self.clock.unix_timestamp_millis();
        let mut entries = self.entries.lock().await;

        let expired = match entries.get(key) {
            Some(entry) if !self.is_expired(entry, now_ms) => {
                return Some(entry.payload.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            trace!(offset = key.offset, "Evicting expired cache entry");
            entries.pop(key);
        }
        None
    }

    pub async fn insert(&self, key: CacheKey, payload: V) {
        let entry = CacheEntry {
            payload,
            fetched_at_ms: self.clock.unix_timestamp_millis(),
        };
        self.entries.lock().await.put(key, entry);
    }

    /// Drops one entry. Returns whether it was present.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.lock().await.pop(key).is_some()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    /// Removes every expired entry and returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now_ms = self.clock.unix_timestamp_millis();
        let mut entries = self.entries.lock().await;

        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now_ms))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    /// Entry count, expired entries included.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
