// Expiring key -> value store for point-in-time lookups (quotes, searches).
//
// Expiry is lazy: an expired entry reads as absent and stays in memory until it is
// overwritten or `purge_expired` runs. Fine for a bounded symbol universe; callers
// caching an unbounded key space (free-text search) must purge.

use ahash::AHashMap;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_valid(&self, now: Instant) -> bool {
        // A ttl too large to represent never expires.
        self.stored_at.checked_add(self.ttl).map_or(true, |expires| now < expires)
    }
}

#[derive(Debug)]
pub struct TtlCache<V> {
    entries: Mutex<AHashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self { entries: Mutex::new(AHashMap::new()) }
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry { value, stored_at: Instant::now(), ttl };
        self.entries.lock().insert(key.into(), entry);
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let entries = self.entries.lock();
        let entry = entries.get(key)?;
        if entry.is_valid(Instant::now()) {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_valid(now));
        before - entries.len()
    }
}

pub fn quote_key(symbol: &str) -> String {
    format!("quote_{symbol}")
}

pub fn search_key(query: &str) -> String {
    format!("search_{}", query.trim().to_lowercase())
}
