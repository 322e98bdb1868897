//! Bounded caches
//!
//! Two flavours keep decoded payloads resident:
//!
//! - [`FifoCache`]: residency queue for chunk payloads. Admitting past the
//!   limit evicts the oldest resident.
//! - [`LruCache`]: keyed cache with a logical clock, used for decoded list
//!   elements.
//!
//! Eviction only drops cached payloads; the records they came from stay
//! addressable and are fetched again on demand.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Something holding a payload that can be dropped on eviction
pub trait Evict: Send + Sync {
    fn evict(&self);
}

/// Cache statistics for monitoring
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: AtomicU64,
    /// Number of cache misses
    pub misses: AtomicU64,
    /// Number of entries evicted
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Calculate hit ratio (0.0 to 1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }
}

/// FIFO residency queue
///
/// With no limit nothing is tracked and nothing is ever evicted.
pub struct FifoCache<T: Evict> {
    limit: Option<usize>,
    queue: Mutex<VecDeque<Arc<T>>>,
    evictions: AtomicU64,
}

impl<T: Evict> FifoCache<T> {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            queue: Mutex::new(VecDeque::new()),
            evictions: AtomicU64::new(0),
        }
    }

    pub const fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Mark `item` resident, evicting the oldest residents past the limit
    ///
    /// Admitting an item that is already resident does nothing.
    pub fn admit(&self, item: &Arc<T>) {
        let Some(limit) = self.limit else {
            return;
        };
        let evicted: Vec<Arc<T>> = {
            let mut queue = self.queue.lock();
            if queue.iter().any(|resident| Arc::ptr_eq(resident, item)) {
                return;
            }
            queue.push_back(Arc::clone(item));
            let excess = queue.len().saturating_sub(limit);
            queue.drain(..excess).collect()
        };
        // evict outside the queue lock
        for victim in evicted {
            trace!("Evicting resident payload");
            victim.evict();
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether `count` more admissions fit without evicting
    pub fn has_room_for(&self, count: usize) -> bool {
        self.limit
            .is_none_or(|limit| self.queue.lock().len() + count <= limit)
    }

    /// Number of tracked residents
    pub fn resident(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Forget every resident without evicting it
    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

struct LruEntry<V> {
    value: V,
    /// Last access time for LRU eviction
    last_access: AtomicU64,
}

/// LRU cache keyed by `K`
pub struct LruCache<K, V> {
    entries: RwLock<HashMap<K, LruEntry<V>>>,
    capacity: usize,
    /// Logical clock for LRU ordering
    clock: AtomicU64,
    stats: CacheStats,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
            clock: AtomicU64::new(0),
            stats: CacheStats::default(),
        }
    }

    /// Get cache statistics
    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the current number of entries in the cache
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Advance the logical clock and return the new value
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look up an entry
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        if let Some(entry) = entries.get(key) {
            entry.last_access.store(self.tick(), Ordering::Relaxed);
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.value.clone())
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Insert an entry, evicting the least recently used ones at capacity
    pub fn insert(&self, key: K, value: V) {
        if self.capacity == 0 {
            return;
        }
        let clock = self.tick();
        let mut entries = self.entries.write();

        if !entries.contains_key(&key) {
            while entries.len() >= self.capacity {
                let Some(victim) = Self::find_lru_entry(&entries) else {
                    break;
                };
                entries.remove(&victim);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        entries.insert(
            key,
            LruEntry {
                value,
                last_access: AtomicU64::new(clock),
            },
        );
    }

    /// Remove an entry
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.entries.write().remove(key).map(|entry| entry.value)
    }

    /// Check if an entry is cached
    pub fn contains(&self, key: &K) -> bool {
        self.entries.read().contains_key(key)
    }

    fn find_lru_entry(entries: &HashMap<K, LruEntry<V>>) -> Option<K> {
        entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access.load(Ordering::Relaxed))
            .map(|(key, _)| key.clone())
    }

    /// Every cached value, in no particular order
    pub fn values(&self) -> Vec<V> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.value.clone())
            .collect()
    }

    /// Drop every entry and start the statistics over
    pub fn clear(&self) {
        self.entries.write().clear();
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    struct Resident {
        cached: AtomicBool,
    }

    impl Resident {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                cached: AtomicBool::new(true),
            })
        }

        fn is_cached(&self) -> bool {
            self.cached.load(Ordering::SeqCst)
        }
    }

    impl Evict for Resident {
        fn evict(&self) {
            self.cached.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_fifo_evicts_oldest() {
        let cache = FifoCache::new(Some(2));
        let items: Vec<_> = (0..4).map(|_| Resident::new()).collect();
        for item in &items {
            cache.admit(item);
        }
        assert_eq!(cache.resident(), 2);
        assert_eq!(cache.evictions(), 2);
        assert!(!items[0].is_cached());
        assert!(!items[1].is_cached());
        assert!(items[2].is_cached());
        assert!(items[3].is_cached());
    }

    #[test]
    fn test_fifo_ignores_duplicates() {
        let cache = FifoCache::new(Some(2));
        let a = Resident::new();
        let b = Resident::new();
        cache.admit(&a);
        cache.admit(&b);
        cache.admit(&a);
        assert_eq!(cache.resident(), 2);
        assert!(a.is_cached());
        assert!(b.is_cached());
        assert!(!cache.has_room_for(1));
    }

    #[test]
    fn test_fifo_unbounded() {
        let cache = FifoCache::new(None);
        let items: Vec<_> = (0..100).map(|_| Resident::new()).collect();
        for item in &items {
            cache.admit(item);
        }
        assert!(items.iter().all(|i| i.is_cached()));
        assert!(cache.has_room_for(usize::MAX / 2));
    }

    #[test]
    fn test_lru_insert_and_get() {
        let cache = LruCache::new(4);
        cache.insert(1u32, "one".to_string());
        assert_eq!(cache.get(&1).as_deref(), Some("one"));
        assert_eq!(cache.get(&2), None);
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
        assert!((cache.stats().hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let cache = LruCache::new(3);
        cache.insert(1u32, 10u32);
        cache.insert(2, 20);
        cache.insert(3, 30);

        // touch 1 so 2 becomes the oldest
        cache.get(&1);
        cache.insert(4, 40);

        assert!(cache.contains(&1));
        assert!(!cache.contains(&2));
        assert!(cache.contains(&3));
        assert!(cache.contains(&4));
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_lru_replace_does_not_evict() {
        let cache = LruCache::new(2);
        cache.insert(1u32, 1u32);
        cache.insert(2, 2);
        cache.insert(2, 22);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&2), Some(22));
        assert_eq!(cache.invalidate(&1), Some(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.values(), vec![22]);
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 0);
        assert!(cache.stats().hit_ratio().abs() < f64::EPSILON);
    }
}
