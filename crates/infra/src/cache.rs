//! Short-lived read cache for list endpoints.
//!
//! Entries age out after a fixed TTL, but every write path that changes what a
//! listing would return must call [`ListCache::invalidate_all`] before it
//! reports success.
//!
//! Readers take a [`Generation`] before querying the store and hand it back to
//! [`ListCache::insert`]; a page read before an invalidation is never stored.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

/// Upper bound on distinct keys per cache.
pub const DEFAULT_MAX_ENTRIES: usize = 256;

/// Invalidation epoch observed by a reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Generation(u64);

#[derive(Debug)]
struct Entries<K, V> {
    generation: u64,
    map: HashMap<K, (Instant, V)>,
}

#[derive(Debug)]
pub struct ListCache<K, V> {
    name: &'static str,
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<Entries<K, V>>,
}

impl<K, V> ListCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self::with_max_entries(name, ttl, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(name: &'static str, ttl: Duration, max_entries: usize) -> Self {
        Self {
            name,
            ttl,
            max_entries,
            entries: RwLock::new(Entries {
                generation: 0,
                map: HashMap::new(),
            }),
        }
    }

    /// A fresh entry, or `None` when absent or expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let (stored_at, value) = entries.map.get(key)?;
        if stored_at.elapsed() >= self.ttl {
            return None;
        }
        debug!(cache = self.name, "cache hit");
        Some(value.clone())
    }

    /// Take before reading the store.
    pub fn generation(&self) -> Generation {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        Generation(entries.generation)
    }

    /// Stores `value` unless the cache was invalidated since `seen` was taken.
    ///
    /// When full, the oldest entry makes room.
    pub fn insert(&self, key: K, value: V, seen: Generation) {
        if self.ttl.is_zero() || self.max_entries == 0 {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.generation != seen.0 {
            debug!(cache = self.name, "stale read discarded");
            return;
        }
        let ttl = self.ttl;
        entries.map.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        if entries.map.len() >= self.max_entries && !entries.map.contains_key(&key) {
            let oldest = entries
                .map
                .iter()
                .min_by_key(|(_, (stored_at, _))| *stored_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.map.remove(&oldest);
            }
        }
        entries.map.insert(key, (Instant::now(), value));
    }

    pub fn invalidate_all(&self) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.map.is_empty() {
            debug!(cache = self.name, evicted = entries.map.len(), "cache invalidated");
        }
        entries.generation = entries.generation.wrapping_add(1);
        entries.map.clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .map
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
