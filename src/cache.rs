//! # Trail Cache
//!
//! Least-recently-used cache of loaded trail references, keyed by the set of
//! dataset names they were merged from.
//!
//! The cache is an ordinary value owned by whoever amortises loading across
//! calls (usually a [`TrailLoader`](crate::TrailLoader)); there is no global
//! instance. A cold cache only costs a re-fetch.

use std::collections::HashMap;
use std::sync::Arc;

use crate::TrailReference;

/// Default number of distinct dataset sets kept.
pub const DEFAULT_CAPACITY: usize = 4;

/// LRU cache with O(n) eviction; capacities here are single digits.
#[derive(Debug)]
pub struct TrailCache {
    capacity: usize,
    entries: HashMap<Vec<String>, CacheEntry>,
    access_counter: u64,
}

#[derive(Debug)]
struct CacheEntry {
    reference: Arc<TrailReference>,
    last_access: u64,
}

impl Default for TrailCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TrailCache {
    /// Create a cache holding at most `capacity` references. A capacity of 0
    /// disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            access_counter: 0,
        }
    }

    /// Merge order does not change match results, so `["spurs", "main"]` and
    /// `["main", "spurs"]` share an entry.
    fn key(names: &[String]) -> Vec<String> {
        let mut key = names.to_vec();
        key.sort();
        key.dedup();
        key
    }

    /// Get the reference for `names`, updating its access time.
    pub fn get(&mut self, names: &[String]) -> Option<Arc<TrailReference>> {
        let entry = self.entries.get_mut(&Self::key(names))?;
        self.access_counter += 1;
        entry.last_access = self.access_counter;
        Some(Arc::clone(&entry.reference))
    }

    /// Insert a reference, evicting the least recently used one if full.
    pub fn insert(&mut self, names: &[String], reference: Arc<TrailReference>) {
        if self.capacity == 0 {
            return;
        }

        let key = Self::key(names);
        self.access_counter += 1;

        if let Some(entry) = self.entries.get_mut(&key) {
            entry.reference = reference;
            entry.last_access = self.access_counter;
            return;
        }

        if self.entries.len() >= self.capacity {
            self.evict_oldest();
        }

        self.entries.insert(
            key,
            CacheEntry {
                reference,
                last_access: self.access_counter,
            },
        );
    }

    /// Remove the reference for `names`.
    pub fn invalidate(&mut self, names: &[String]) {
        self.entries.remove(&Self::key(names));
    }

    /// Remove every reference.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.access_counter = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GeoPoint, TrailSegment};

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn reference(n: usize) -> Arc<TrailReference> {
        let segments = (0..n)
            .map(|i| {
                TrailSegment::new(
                    GeoPoint::new(i as f64 * 0.001, 0.0),
                    GeoPoint::new(i as f64 * 0.001 + 0.001, 0.0),
                )
            })
            .collect();
        Arc::new(TrailReference::from_segments(segments))
    }

    #[test]
    fn test_key_ignores_order() {
        let mut cache = TrailCache::default();
        cache.insert(&names(&["main", "spurs"]), reference(2));
        let hit = cache.get(&names(&["spurs", "main", "main"])).unwrap();
        assert_eq!(hit.len(), 2);
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut cache = TrailCache::new(2);
        cache.insert(&names(&["a"]), reference(1));
        cache.insert(&names(&["b"]), reference(2));

        // Touch "a" so "b" becomes the oldest
        assert!(cache.get(&names(&["a"])).is_some());
        cache.insert(&names(&["c"]), reference(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(&names(&["a"])).is_some());
        assert!(cache.get(&names(&["b"])).is_none());
        assert!(cache.get(&names(&["c"])).is_some());
    }

    #[test]
    fn test_invalidate_and_clear() {
        let mut cache = TrailCache::new(3);
        cache.insert(&names(&["a"]), reference(1));
        cache.insert(&names(&["b"]), reference(1));

        cache.invalidate(&names(&["a"]));
        assert!(cache.get(&names(&["a"])).is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let mut cache = TrailCache::new(0);
        cache.insert(&names(&["a"]), reference(1));
        assert!(cache.get(&names(&["a"])).is_none());
    }
}
