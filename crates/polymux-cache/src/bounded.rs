//! Generic LRU cache bounded by both entry count and approximate byte size
//! (spec §4.4: "bounded by both entry count and approximate memory... on
//! insertion causing either bound to be exceeded, least-recently-used
//! entries are evicted until both bounds are satisfied again").

use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lru::LruCache;

/// Point-in-time hit/miss/eviction counters, cheap to snapshot and safe to
/// expose to callers that want to report cache health (spec §4.4's hit-rate
/// target is "tested empirically, not a strict invariant" — this is the
/// data such a test reads).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub approx_bytes: usize,
    pub hit_rate: f64,
}

impl CacheStats {
    fn hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// An LRU cache bounded by both `max_entries` and `max_bytes`. `size_of`
/// estimates a value's weight toward the byte bound; callers pick whatever
/// estimate is cheap to compute (e.g. `String::len`, a serialized-JSON
/// length, or a fixed per-symbol-node constant).
pub struct BoundedCache<K: Hash + Eq, V> {
    inner: Mutex<LruCache<K, (V, usize)>>,
    max_entries: usize,
    max_bytes: usize,
    total_bytes: AtomicU64,
    counters: Counters,
    size_of: fn(&V) -> usize,
}

impl<K: Hash + Eq + Clone, V: Clone> BoundedCache<K, V> {
    pub fn new(max_entries: usize, max_bytes: usize, size_of: fn(&V) -> usize) -> Self {
        // Unbounded on the `lru` crate's own count axis: this type enforces
        // both the count and byte bounds itself in `evict_to_bounds`, so the
        // crate's built-in capacity never fights our own policy.
        BoundedCache {
            inner: Mutex::new(LruCache::unbounded()),
            max_entries,
            max_bytes,
            total_bytes: AtomicU64::new(0),
            counters: Counters::default(),
            size_of,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        match inner.get(key) {
            Some((value, _)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().unwrap().contains(key)
    }

    /// Inserts or replaces `key`, then evicts least-recently-used entries
    /// until both bounds are satisfied.
    pub fn insert(&self, key: K, value: V) {
        let size = (self.size_of)(&value);
        let mut inner = self.inner.lock().unwrap();
        if let Some((_, old_size)) = inner.put(key, (value, size)) {
            self.total_bytes.fetch_sub(old_size as u64, Ordering::Relaxed);
        }
        self.total_bytes.fetch_add(size as u64, Ordering::Relaxed);
        self.evict_to_bounds(&mut inner);
    }

    fn evict_to_bounds(&self, inner: &mut LruCache<K, (V, usize)>) {
        while inner.len() > self.max_entries || self.total_bytes.load(Ordering::Relaxed) > self.max_bytes as u64 {
            match inner.pop_lru() {
                Some((_, (_, size))) => {
                    self.total_bytes.fetch_sub(size as u64, Ordering::Relaxed);
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().unwrap();
        inner.pop(key).map(|(value, size)| {
            self.total_bytes.fetch_sub(size as u64, Ordering::Relaxed);
            value
        })
    }

    /// Removes every entry whose key matches `predicate`, e.g. "every
    /// (uri, hash) entry for this URI" during invalidation (spec §4.4).
    pub fn retain_remove(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let doomed: Vec<K> = inner.iter().filter(|(k, _)| predicate(k)).map(|(k, _)| k.clone()).collect();
        for key in &doomed {
            if let Some((_, size)) = inner.pop(key) {
                self.total_bytes.fetch_sub(size as u64, Ordering::Relaxed);
            }
        }
        doomed.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.clear();
        self.total_bytes.store(0, Ordering::Relaxed);
    }

    /// Snapshots every `(key, value)` pair currently held, without touching
    /// recency order. Used by the disk-snapshot writer.
    pub fn entries(&self) -> Vec<(K, V)> {
        let inner = self.inner.lock().unwrap();
        inner.iter().map(|(k, (v, _))| (k.clone(), v.clone())).collect()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        CacheStats {
            hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entries: inner.len(),
            approx_bytes: self.total_bytes.load(Ordering::Relaxed) as usize,
            hit_rate: CacheStats::hit_rate(hits, misses),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_and_miss_are_counted() {
        let cache: BoundedCache<String, String> = BoundedCache::new(10, 1024, |v| v.len());
        cache.insert("a".to_string(), "one".to_string());
        assert_eq!(cache.get(&"a".to_string()), Some("one".to_string()));
        assert_eq!(cache.get(&"b".to_string()), None);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn entry_count_bound_evicts_least_recently_used() {
        let cache: BoundedCache<i32, String> = BoundedCache::new(2, 1_000_000, |v| v.len());
        cache.insert(1, "a".to_string());
        cache.insert(2, "b".to_string());
        cache.get(&1); // touch 1 so 2 becomes LRU
        cache.insert(3, "c".to_string());
        assert_eq!(cache.get(&2), None);
        assert!(cache.contains(&1));
        assert!(cache.contains(&3));
    }

    #[test]
    fn byte_bound_evicts_even_under_the_entry_count_bound() {
        let cache: BoundedCache<i32, String> = BoundedCache::new(100, 10, |v| v.len());
        cache.insert(1, "aaaaa".to_string()); // 5 bytes
        cache.insert(2, "bbbbb".to_string()); // 5 bytes, total 10, at bound
        cache.insert(3, "ccccc".to_string()); // forces eviction of 1
        assert_eq!(cache.get(&1), None);
        assert!(cache.contains(&2));
        assert!(cache.contains(&3));
        assert!(cache.stats().approx_bytes <= 10);
    }

    #[test]
    fn retain_remove_purges_matching_keys_only() {
        let cache: BoundedCache<(String, String), String> = BoundedCache::new(100, 10_000, |v| v.len());
        cache.insert(("file:///a".to_string(), "h1".to_string()), "x".to_string());
        cache.insert(("file:///a".to_string(), "h2".to_string()), "y".to_string());
        cache.insert(("file:///b".to_string(), "h1".to_string()), "z".to_string());

        let removed = cache.retain_remove(|(uri, _)| uri == "file:///a");
        assert_eq!(removed, 2);
        assert!(!cache.contains(&("file:///a".to_string(), "h1".to_string())));
        assert!(cache.contains(&("file:///b".to_string(), "h1".to_string())));
    }
}
