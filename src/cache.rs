use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

/// Bounded LRU cache whose entries also expire after a fixed time to live.
///
/// Lookups promote entries, so the cache is behind a mutex even for reads.
pub struct TtlCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, (Instant, V)>>,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    /// A zero capacity is raised to one.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some((inserted, value)) if inserted.elapsed() < self.ttl => return Some(value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.lock().put(key, (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.entries.lock().pop(key).map(|(_, value)| value)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Hash + Eq + Clone, V: Clone> TtlCache<K, V> {
    /// Drops every entry whose key matches `pred`. Returns how many were dropped.
    pub fn invalidate_where<F: FnMut(&K) -> bool>(&self, mut pred: F) -> usize {
        let mut entries = self.entries.lock();
        let stale: Vec<K> = entries
            .iter()
            .map(|(key, _)| key)
            .filter(|key| pred(key))
            .cloned()
            .collect();
        for key in &stale {
            entries.pop(key);
        }
        stale.len()
    }
}
