//! The result cache.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};

/// Cache limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries.
    pub max_items: usize,
    /// Maximum summed entry size in bytes.
    pub max_bytes: usize,
    /// Entry lifetime measured from insertion.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            max_bytes: 64 * 1024 * 1024,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that returned a value.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Accepted inserts.
    pub insertions: u64,
    /// Entries dropped to respect the limits.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, or zero before the first lookup.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: Arc<V>,
    size: usize,
    inserted_at: Instant,
    tick: u64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    /// Last-use tick to key; the first entry is the least recently used.
    recency: BTreeMap<u64, String>,
    total_bytes: usize,
    next_tick: u64,
    stats: CacheStats,
}

impl<V> Inner<V> {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        self.total_bytes -= entry.size;
        Some(entry)
    }

    fn evict_lru(&mut self) -> bool {
        let Some((_, key)) = self.recency.pop_first() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.total_bytes -= entry.size;
        }
        self.stats.evictions += 1;
        true
    }
}

/// A bounded, time-limited map from cache keys to shared values.
///
/// Values are handed out as [`Arc`]s, so a hit never copies the value. One
/// mutex guards the map, the recency order and the counters; no lock is held
/// while values are built or serialized.
#[derive(Debug)]
pub struct ResultCache<V> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner<V>>,
}

impl<V> ResultCache<V> {
    /// Create a cache on the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache on a custom clock.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                total_bytes: 0,
                next_tick: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// The limits this cache was created with.
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up a live entry and mark it most recently used.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let expired = inner.entries.get(key).map(|entry| self.is_expired(entry, now));
        match expired {
            None => {
                inner.stats.misses += 1;
                debug!(key, "cache miss");
                return None;
            }
            Some(true) => {
                inner.remove(key);
                inner.stats.expirations += 1;
                inner.stats.misses += 1;
                debug!(key, "cache entry expired");
                return None;
            }
            Some(false) => {}
        }

        inner.touch(key);
        inner.stats.hits += 1;
        debug!(key, "cache hit");
        inner.entries.get(key).map(|e| Arc::clone(&e.value))
    }

    /// Insert or replace an entry of `size` bytes.
    ///
    /// Least recently used entries are evicted until both limits hold.
    /// Returns `false`, leaving the cache unchanged, when the value alone
    /// exceeds `max_bytes` or the cache holds no items.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Arc<V>>, size: usize) -> bool {
        let key = key.into();
        if self.config.max_items == 0 {
            warn!(key = %key, "cache holds no items, not stored");
            return false;
        }
        if size > self.config.max_bytes {
            warn!(
                key = %key,
                size,
                max_bytes = self.config.max_bytes,
                "value too large for cache, not stored"
            );
            return false;
        }

        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.remove(&key);

        let mut evicted = 0usize;
        while inner.entries.len() >= self.config.max_items
            || inner.total_bytes + size > self.config.max_bytes
        {
            if !inner.evict_lru() {
                break;
            }
            evicted += 1;
        }
        if evicted > 0 {
            info!(
                evicted,
                entries = inner.entries.len(),
                bytes = inner.total_bytes,
                "evicted cache entries"
            );
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.recency.insert(tick, key.clone());
        inner.total_bytes += size;
        inner.stats.insertions += 1;
        inner.entries.insert(
            key,
            Entry {
                value: value.into(),
                size,
                inserted_at: now,
                tick,
            },
        );
        true
    }

    /// Remove an entry; returns whether it was present.
    pub fn remove(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
        inner.total_bytes = 0;
    }

    /// Drop every expired entry and return how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| self.is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        inner.stats.expirations += expired.len() as u64;
        expired.len()
    }

    /// Number of entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Summed size of all entries.
    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    /// A snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted_at) >= self.config.ttl
    }
}

impl<V: Serialize> ResultCache<V> {
    /// Insert a value sized by its serialized JSON length.
    ///
    /// Values that fail to serialize are not stored.
    pub fn insert_serialized(&self, key: impl Into<String>, value: impl Into<Arc<V>>) -> bool {
        let key = key.into();
        let value = value.into();
        match serde_json::to_vec(value.as_ref()) {
            Ok(bytes) => self.insert(key, value, bytes.len()),
            Err(err) => {
                warn!(key = %key, error = %err, "cannot size cache value, not stored");
                false
            }
        }
    }
}
