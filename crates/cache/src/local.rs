//! In-process TTL cache backed by DashMap for lock-free concurrent access.
//! Bounded: once full, expired entries are dropped first, then the oldest
//! tenth of the entries in one pass.
//!
//! The capacity check and the insert are separate map operations, so
//! concurrent puts of new keys may briefly leave the cache a few entries over
//! `max_entries`. The next put that finds it full trims it back.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Capacity- and TTL-bounded concurrent cache.
pub struct TtlCache<K, V> {
    store: DashMap<K, CacheEntry<V>>,
    ttl: Duration,
    max_entries: usize,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            store: DashMap::with_capacity(max_entries.min(4096)),
            ttl,
            max_entries,
        }
    }

    pub fn with_ttl_secs(ttl_secs: u64, max_entries: usize) -> Self {
        Self::new(Duration::from_secs(ttl_secs), max_entries)
    }

    /// Returns None if expired or missing.
    pub fn get(&self, key: &K) -> Option<V> {
        let entry = self.store.get(key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.store.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    /// Insert or replace a value, making room first if the cache is full.
    pub fn put(&self, key: K, value: V) {
        self.make_room_for(&key);
        self.store.insert(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Mutate the cached value in place, seeding it with `init` when the key is
    /// missing or expired. Returns the value after mutation.
    ///
    /// The entry stays write-locked for the duration of `apply`, so concurrent
    /// upserts of the same key are serialised.
    pub fn upsert<I, F>(&self, key: K, init: I, apply: F) -> V
    where
        I: FnOnce() -> V,
        F: FnOnce(&mut V),
    {
        self.make_room_for(&key);
        match self.store.entry(key) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.inserted_at.elapsed() > self.ttl {
                    entry.value = init();
                }
                apply(&mut entry.value);
                entry.inserted_at = Instant::now();
                entry.value.clone()
            }
            Entry::Vacant(vacant) => {
                let mut value = init();
                apply(&mut value);
                vacant.insert(CacheEntry {
                    value: value.clone(),
                    inserted_at: Instant::now(),
                });
                value
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.store.remove(key).map(|(_, entry)| entry.value)
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let before = self.store.len();
        self.store
            .retain(|_, entry| entry.inserted_at.elapsed() <= self.ttl);
        before.saturating_sub(self.store.len())
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn clear(&self) {
        self.store.clear();
    }

    fn eviction_batch(&self) -> usize {
        (self.max_entries / 10).max(1)
    }

    // Must not be called while holding a reference into the map.
    fn make_room_for(&self, key: &K) {
        if self.store.len() < self.max_entries || self.store.contains_key(key) {
            return;
        }
        if self.evict_expired() > 0 && self.store.len() < self.max_entries {
            return;
        }
        // Trim below capacity by a whole batch so the scan is paid once per
        // batch of inserts rather than once per insert.
        let excess = self.store.len() + 1 - self.max_entries;
        let count = excess.max(self.eviction_batch()).min(self.store.len());
        let mut entries: Vec<(Instant, K)> = self
            .store
            .iter()
            .map(|entry| (entry.value().inserted_at, entry.key().clone()))
            .collect();
        if count < entries.len() {
            entries.select_nth_unstable_by_key(count, |(inserted_at, _)| *inserted_at);
            entries.truncate(count);
        }
        for (_, oldest) in &entries {
            self.store.remove(oldest);
        }
        metrics::counter!("cache.local.evicted").increment(entries.len() as u64);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_remove() {
        let cache: TtlCache<String, u32> = TtlCache::with_ttl_secs(60, 10);
        cache.put("a".into(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        assert_eq!(cache.remove(&"a".to_string()), Some(1));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expired_entries_are_invisible() {
        let cache: TtlCache<u64, u32> = TtlCache::new(Duration::from_millis(0), 10);
        cache.put(1, 1);
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_is_enforced() {
        let cache: TtlCache<u64, u64> = TtlCache::with_ttl_secs(60, 3);
        for i in 0..10 {
            cache.put(i, i);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(cache.len(), 3);
        // The newest entries survive.
        assert_eq!(cache.get(&9), Some(9));
        assert_eq!(cache.get(&0), None);
    }

    #[test]
    fn test_full_cache_evicts_oldest_batch() {
        let cache: TtlCache<u64, u64> = TtlCache::with_ttl_secs(60, 20);
        for i in 0..20 {
            cache.put(i, i);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(cache.len(), 20);

        cache.put(20, 20);
        // One insert frees room for the next batch.
        assert_eq!(cache.len(), 19);
        assert_eq!(cache.get(&0), None);
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(2));
        assert_eq!(cache.get(&20), Some(20));

        cache.put(21, 21);
        assert_eq!(cache.len(), 20);
        assert_eq!(cache.get(&2), Some(2));
    }

    #[test]
    fn test_len_stays_within_capacity() {
        let cache: TtlCache<u64, u64> = TtlCache::with_ttl_secs(60, 10);
        for i in 0..500 {
            cache.put(i, i);
            assert!(cache.len() <= 10);
        }
        assert_eq!(cache.get(&499), Some(499));
    }

    #[test]
    fn test_upsert_accumulates() {
        let cache: TtlCache<&'static str, Vec<u32>> = TtlCache::with_ttl_secs(60, 10);
        cache.upsert("k", Vec::new, |v| v.push(1));
        let value = cache.upsert("k", Vec::new, |v| v.push(2));
        assert_eq!(value, vec![1, 2]);
    }

    #[test]
    fn test_upsert_reseeds_expired_value() {
        let cache: TtlCache<u8, u32> = TtlCache::new(Duration::from_millis(0), 10);
        cache.upsert(1, || 0, |v| *v += 5);
        std::thread::sleep(Duration::from_millis(2));
        let value = cache.upsert(1, || 0, |v| *v += 1);
        assert_eq!(value, 1);
    }
}
