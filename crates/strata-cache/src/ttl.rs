//! Time-bounded FIFO cache.
//!
//! Entries are visible to [`TimeBoundCache::get`] only while
//! `now - inserted < ttl`. Expired entries are not swept in the background;
//! they are purged the next time they are looked up.
//!
//! When the cache is full, inserting a new key evicts exactly one entry: the
//! one inserted first. Lookups do not refresh an entry's position, so this is
//! not an LRU. Overwriting an existing key refreshes its timestamp but keeps
//! its place in the eviction queue.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// A stored value plus its insertion time.
struct CacheEntry<V> {
    value: V,
    inserted: Instant,
}

/// Backing store, always accessed under the cache mutex.
struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    /// Keys in insertion order. Kept in sync with `entries`.
    order: VecDeque<K>,
}

impl<K: Eq + Hash, V> CacheState<K, V> {
    fn forget(&mut self, key: &K) -> Option<CacheEntry<V>> {
        let removed = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(removed)
    }
}

/// Bounded key/value store with a fixed time-to-live.
///
/// All operations are safe to call from multiple tasks; mutation happens under
/// a single mutex over the backing store.
pub struct TimeBoundCache<K, V> {
    state: Mutex<CacheState<K, V>>,
    max_entries: usize,
    ttl: Duration,
}

impl<K, V> TimeBoundCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `max_entries` entries for `ttl` each.
    ///
    /// A `max_entries` of zero is treated as one.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        let max_entries = max_entries.max(1);
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::with_capacity(max_entries),
                order: VecDeque::with_capacity(max_entries),
            }),
            max_entries,
            ttl,
        }
    }

    /// Maximum number of entries.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Time-to-live applied to every entry.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<K, V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.saturating_duration_since(entry.inserted) >= self.ttl
    }

    /// Insert or overwrite `key`.
    ///
    /// If the cache is full and `key` is new, the oldest inserted entry is
    /// evicted first.
    pub fn put(&self, key: K, value: V) {
        let now = Instant::now();
        let mut state = self.lock();

        if let Some(entry) = state.entries.get_mut(&key) {
            entry.value = value;
            entry.inserted = now;
            return;
        }

        if state.entries.len() >= self.max_entries {
            while let Some(oldest) = state.order.pop_front() {
                if state.entries.remove(&oldest).is_some() {
                    trace!(size = state.entries.len(), "evicted oldest cache entry");
                    break;
                }
            }
        }

        state.order.push_back(key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                value,
                inserted: now,
            },
        );
    }

    /// Look up `key`, purging it if its time-to-live has elapsed.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let mut state = self.lock();

        let expired = match state.entries.get(key) {
            None => return None,
            Some(entry) => self.is_expired(entry, now),
        };

        if expired {
            state.forget(key);
            trace!("purged expired cache entry");
            return None;
        }

        state.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Whether `key` is present and unexpired. Purges it if expired.
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`, returning its value if it was present (expired or not).
    pub fn remove(&self, key: &K) -> Option<V> {
        self.lock().forget(key).map(|entry| entry.value)
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }

    /// Unexpired entries in insertion order.
    pub fn snapshot(&self) -> Vec<(K, V)> {
        let now = Instant::now();
        let state = self.lock();
        state
            .order
            .iter()
            .filter_map(|key| {
                let entry = state.entries.get(key)?;
                if self.is_expired(entry, now) {
                    None
                } else {
                    Some((key.clone(), entry.value.clone()))
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn test_put_get() {
        let cache = TimeBoundCache::new(4, TTL);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), Some(2));
        assert_eq!(cache.get(&"c"), None);
        assert_eq!(cache.size(), 2);
    }

    #[test]
    fn test_evicts_first_inserted_at_capacity() {
        let cache = TimeBoundCache::new(3, TTL);
        for (i, key) in ["k0", "k1", "k2", "k3"].iter().enumerate() {
            cache.put(*key, i);
        }
        assert_eq!(cache.size(), 3);
        assert_eq!(cache.get(&"k0"), None);
        assert_eq!(cache.get(&"k1"), Some(1));
        assert_eq!(cache.get(&"k3"), Some(3));
    }

    #[test]
    fn test_lookup_does_not_refresh_position() {
        let cache = TimeBoundCache::new(2, TTL);
        cache.put("first", 1);
        cache.put("second", 2);
        // An LRU would now evict "second".
        assert_eq!(cache.get(&"first"), Some(1));
        cache.put("third", 3);
        assert_eq!(cache.get(&"first"), None);
        assert_eq!(cache.get(&"second"), Some(2));
    }

    #[test]
    fn test_overwrite_keeps_size_and_position() {
        let cache = TimeBoundCache::new(2, TTL);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        assert_eq!(cache.size(), 2);
        assert_eq!(cache.get(&"a"), Some(10));

        cache.put("c", 3);
        assert_eq!(cache.get(&"a"), None, "overwritten key keeps its queue slot");
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_purged_on_get() {
        let cache = TimeBoundCache::new(8, TTL);
        cache.put("x", 7);
        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(cache.get(&"x"), Some(7));

        tokio::time::advance(Duration::from_millis(2)).await;
        assert_eq!(cache.size(), 1, "expiry is lazy");
        assert_eq!(cache.get(&"x"), None);
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_refreshes_timestamp() {
        let cache = TimeBoundCache::new(8, TTL);
        cache.put("x", 1);
        tokio::time::advance(Duration::from_secs(40)).await;
        cache.put("x", 2);
        tokio::time::advance(Duration::from_secs(40)).await;
        assert_eq!(cache.get(&"x"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_skips_expired() {
        let cache = TimeBoundCache::new(8, TTL);
        cache.put("old", 1);
        tokio::time::advance(Duration::from_secs(50)).await;
        cache.put("new", 2);
        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(cache.snapshot(), vec![("new", 2)]);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = TimeBoundCache::new(4, TTL);
        cache.put(1u32, "one");
        cache.put(2u32, "two");
        assert_eq!(cache.remove(&1), Some("one"));
        assert_eq!(cache.remove(&1), None);
        cache.clear();
        assert!(cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache = TimeBoundCache::new(0, TTL);
        assert_eq!(cache.max_entries(), 1);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.size(), 1);
        assert_eq!(cache.get(&"b"), Some(2));
    }

    #[test]
    fn test_concurrent_puts_respect_capacity() {
        let cache = Arc::new(TimeBoundCache::new(16, TTL));
        let handles: Vec<_> = (0..8u32)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..100u32 {
                        cache.put(t * 1000 + i, i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread");
        }
        assert_eq!(cache.size(), 16);
        assert_eq!(cache.snapshot().len(), 16);
    }
}
