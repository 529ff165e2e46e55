//! Fixed-capacity LRU cache with hit/miss/eviction accounting.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{RetrievalError, Result};

/// Thread-safe LRU cache.
///
/// Both `get` and `put` refresh a key's recency, so every structural
/// operation (including reads) serializes behind one mutex. After any
/// mutation, `len() <= max_size` holds.
pub struct LruCache<K, V> {
    max_size: usize,
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K, V> {
    map: HashMap<K, V>,
    /// Keys ordered least- to most-recently used
    order: VecDeque<K>,
    hit_count: u64,
    miss_count: u64,
    eviction_count: u64,
}

/// What a `put` displaced: the previous value under the same key, and the
/// least-recently-used entry evicted to stay within capacity.
#[derive(Debug)]
pub struct PutOutcome<K, V> {
    pub previous: Option<V>,
    pub evicted: Option<(K, V)>,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub max_size: usize,
    pub current_size: usize,
    pub hit_count: u64,
    pub miss_count: u64,
    pub eviction_count: u64,
    pub hit_rate: f64,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `max_size` entries.
    pub fn new(max_size: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(RetrievalError::Config(
                "cache max_size must be positive".to_string(),
            ));
        }

        Ok(Self {
            max_size,
            inner: Mutex::new(Inner {
                map: HashMap::with_capacity(max_size),
                order: VecDeque::with_capacity(max_size),
                hit_count: 0,
                miss_count: 0,
                eviction_count: 0,
            }),
        })
    }

    /// Get a value, refreshing the key's recency on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(value) = inner.map.get(key).cloned() {
            inner.hit_count += 1;
            inner.touch(key);
            Some(value)
        } else {
            inner.miss_count += 1;
            None
        }
    }

    /// Insert or replace a value as the most-recently-used entry.
    ///
    /// When capacity would be exceeded, the least-recently-used entry is
    /// evicted before this returns and handed back so the caller can release
    /// it.
    pub fn put(&self, key: K, value: V) -> PutOutcome<K, V> {
        let mut inner = self.inner.lock().unwrap();

        let previous = inner.map.insert(key.clone(), value);
        inner.touch(&key);

        let evicted = if inner.map.len() > self.max_size {
            inner.evict_lru()
        } else {
            None
        };

        PutOutcome { previous, evicted }
    }

    /// Remove an entry, returning its value if present.
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        let value = inner.map.remove(key);
        if value.is_some() {
            inner.order.retain(|k| k != key);
        }
        value
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.lock().unwrap().map.contains_key(key)
    }

    /// Drain every entry, returning them so the caller can release each one.
    pub fn clear(&self) -> Vec<(K, V)> {
        let mut inner = self.inner.lock().unwrap();
        let order = std::mem::take(&mut inner.order);
        order
            .into_iter()
            .filter_map(|key| inner.map.remove(&key).map(|v| (key, v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Snapshot the counters.
    pub fn statistics(&self) -> CacheStatistics {
        let inner = self.inner.lock().unwrap();
        let lookups = inner.hit_count + inner.miss_count;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            inner.hit_count as f64 / lookups as f64
        };

        CacheStatistics {
            max_size: self.max_size,
            current_size: inner.map.len(),
            hit_count: inner.hit_count,
            miss_count: inner.miss_count,
            eviction_count: inner.eviction_count,
            hit_rate,
        }
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Move a key to the most-recently-used position.
    fn touch(&mut self, key: &K) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.clone());
    }

    fn evict_lru(&mut self) -> Option<(K, V)> {
        let key = self.order.pop_front()?;
        let value = self.map.remove(&key)?;
        self.eviction_count += 1;
        debug!(
            size = self.map.len(),
            "evicted least-recently-used cache entry"
        );
        Some((key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_is_config_error() {
        let cache = LruCache::<String, u32>::new(0);
        assert!(matches!(cache, Err(RetrievalError::Config(_))));
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = LruCache::new(2).unwrap();
        cache.put("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.get(&"b".to_string()), None);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let cache = LruCache::new(3).unwrap();
        for i in 0..10 {
            cache.put(format!("k{}", i), i);
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache = LruCache::new(3).unwrap();
        cache.put("k1".to_string(), 1);
        cache.put("k2".to_string(), 2);
        cache.put("k3".to_string(), 3);

        let outcome = cache.put("k4".to_string(), 4);
        let (evicted_key, evicted_value) = outcome.evicted.unwrap();
        assert_eq!(evicted_key, "k1");
        assert_eq!(evicted_value, 1);
        assert!(!cache.contains_key(&"k1".to_string()));
    }

    #[test]
    fn test_get_refreshes_recency() {
        let cache = LruCache::new(3).unwrap();
        cache.put("k1".to_string(), 1);
        cache.put("k2".to_string(), 2);
        cache.put("k3".to_string(), 3);

        // Touching k1 makes k2 the eviction victim
        cache.get(&"k1".to_string());
        let outcome = cache.put("k4".to_string(), 4);
        assert_eq!(outcome.evicted.unwrap().0, "k2");
        assert!(cache.contains_key(&"k1".to_string()));
    }

    #[test]
    fn test_put_refreshes_recency() {
        let cache = LruCache::new(2).unwrap();
        cache.put("k1".to_string(), 1);
        cache.put("k2".to_string(), 2);
        // Re-putting k1 makes k2 the LRU
        cache.put("k1".to_string(), 10);

        let outcome = cache.put("k3".to_string(), 3);
        assert_eq!(outcome.evicted.unwrap().0, "k2");
        assert_eq!(cache.get(&"k1".to_string()), Some(10));
    }

    #[test]
    fn test_put_returns_previous_value() {
        let cache = LruCache::new(2).unwrap();
        cache.put("a".to_string(), 1);
        let outcome = cache.put("a".to_string(), 2);
        assert_eq!(outcome.previous, Some(1));
        assert!(outcome.evicted.is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_hit_miss_accounting() {
        let cache = LruCache::new(2).unwrap();
        cache.put("a".to_string(), 1);

        cache.get(&"a".to_string());
        cache.get(&"missing".to_string());
        cache.get(&"a".to_string());

        let stats = cache.statistics();
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.miss_count, 1);
        assert!((stats.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_hit_rate_zero_without_lookups() {
        let cache = LruCache::<String, u32>::new(2).unwrap();
        assert_eq!(cache.statistics().hit_rate, 0.0);
    }

    #[test]
    fn test_eviction_count() {
        let cache = LruCache::new(1).unwrap();
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);
        cache.put("c".to_string(), 3);
        assert_eq!(cache.statistics().eviction_count, 2);
    }

    #[test]
    fn test_remove() {
        let cache = LruCache::new(2).unwrap();
        cache.put("a".to_string(), 1);
        assert_eq!(cache.remove(&"a".to_string()), Some(1));
        assert_eq!(cache.remove(&"a".to_string()), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_drains_entries() {
        let cache = LruCache::new(3).unwrap();
        cache.put("a".to_string(), 1);
        cache.put("b".to_string(), 2);

        let drained = cache.clear();
        assert_eq!(drained.len(), 2);
        assert!(cache.is_empty());
        // Clearing is not eviction
        assert_eq!(cache.statistics().eviction_count, 0);
    }
}
