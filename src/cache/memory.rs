//! Bounded Memory Cache Module
//!
//! Access-ordered RAM tier with a cost budget and an eviction hand-off.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::cache::{CacheStats, LruTracker};

// == Removal Cause ==
/// Why an entry left the memory tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Evicted to bring the total cost back under capacity
    Capacity,
    /// Overwritten by a put for the same key
    Replaced,
    /// Removed by `remove`, `retain` or `clear`
    Explicit,
}

impl RemovalCause {
    pub fn was_evicted(self) -> bool {
        self == RemovalCause::Capacity
    }
}

// == Eviction Listener ==
/// Receives entries leaving a [`BoundedMemoryCache`].
///
/// Called synchronously before the triggering operation returns, after the
/// cache lock is released. Implementations must not call back into the cache
/// that notified them.
pub trait EvictionListener<V>: Send + Sync {
    fn on_removal(&self, key: &str, value: Arc<V>, cause: RemovalCause);
}

// == Cost ==
/// Cost accounting used when a tier computes entry costs itself.
pub trait Weigher<V>: Send + Sync {
    fn cost(&self, value: &V) -> u64;
}

/// Every entry costs 1, capacity is an entry count.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountWeigher;

impl<V> Weigher<V> for CountWeigher {
    fn cost(&self, _value: &V) -> u64 {
        1
    }
}

/// Values that know their own size in bytes.
pub trait ByteSize {
    fn byte_size(&self) -> u64;
}

impl ByteSize for Vec<u8> {
    fn byte_size(&self) -> u64 {
        self.len() as u64
    }
}

impl ByteSize for String {
    fn byte_size(&self) -> u64 {
        self.len() as u64
    }
}

/// Entry cost is the value's byte size, capacity is a byte budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteWeigher;

impl<V: ByteSize> Weigher<V> for ByteWeigher {
    fn cost(&self, value: &V) -> u64 {
        value.byte_size()
    }
}

// == Memory Entry ==
#[derive(Debug)]
struct MemoryEntry<V> {
    value: Arc<V>,
    cost: u64,
}

#[derive(Debug)]
struct MemoryState<V> {
    entries: HashMap<String, MemoryEntry<V>>,
    lru: LruTracker,
    total_cost: u64,
    capacity: u64,
    stats: CacheStats,
}

type Removed<V> = Vec<(String, Arc<V>, RemovalCause)>;

impl<V> MemoryState<V> {
    fn take(&mut self, key: &str) -> Option<MemoryEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        self.total_cost -= entry.cost;
        Some(entry)
    }

    /// Evicts least recently used entries until the budget holds.
    fn trim(&mut self, removed: &mut Removed<V>) {
        while self.total_cost > self.capacity {
            let Some(key) = self.lru.evict_oldest() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&key) {
                self.total_cost -= entry.cost;
                self.stats.record_eviction();
                trace!(key = %key, cost = entry.cost, "evicted from memory tier");
                removed.push((key, entry.value, RemovalCause::Capacity));
            }
        }
    }
}

// == Bounded Memory Cache ==
/// Fixed-budget, access-ordered map from key to shared value.
///
/// Each successful `get` or `put` makes the entry most recently used. After a
/// put, least recently used entries are evicted while the total cost exceeds
/// the capacity; every evicted entry is handed to the listener exactly once.
pub struct BoundedMemoryCache<V> {
    state: Mutex<MemoryState<V>>,
    listener: Option<Arc<dyn EvictionListener<V>>>,
}

impl<V> BoundedMemoryCache<V> {
    // == Constructor ==
    /// Creates a cache with the given cost budget and no listener.
    pub fn new(capacity: u64) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                entries: HashMap::new(),
                lru: LruTracker::new(),
                total_cost: 0,
                capacity,
                stats: CacheStats::new(),
            }),
            listener: None,
        }
    }

    /// Creates a cache that reports every removal to `listener`.
    pub fn with_listener(capacity: u64, listener: Arc<dyn EvictionListener<V>>) -> Self {
        Self {
            listener: Some(listener),
            ..Self::new(capacity)
        }
    }

    // == Put ==
    /// Stores `value` under `key` with the given cost.
    ///
    /// A single entry costing more than the whole capacity is accepted and
    /// then immediately evicted to the listener.
    pub fn put(&self, key: impl Into<String>, value: Arc<V>, cost: u64) {
        let key = key.into();
        let mut removed = Vec::new();
        {
            let mut state = self.state.lock();
            if let Some(old) = state.take(&key) {
                removed.push((key.clone(), old.value, RemovalCause::Replaced));
            }
            state.lru.touch(&key);
            state.total_cost += cost;
            state.entries.insert(key, MemoryEntry { value, cost });
            state.trim(&mut removed);
        }
        self.notify(removed);
    }

    // == Get ==
    /// Returns the value for `key`, making it most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let mut state = self.state.lock();
        match state.entries.get(key).map(|e| Arc::clone(&e.value)) {
            Some(value) => {
                state.lru.touch(key);
                state.stats.record_hit();
                Some(value)
            }
            None => {
                state.stats.record_miss();
                None
            }
        }
    }

    /// Returns true if `key` is resident, without touching it.
    pub fn contains(&self, key: &str) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    // == Remove ==
    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        let entry = self.state.lock().take(key)?;
        let value = Arc::clone(&entry.value);
        self.notify(vec![(key.to_string(), entry.value, RemovalCause::Explicit)]);
        Some(value)
    }

    /// Removes every entry whose key does not satisfy `keep`.
    ///
    /// Returns the number of removed entries.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let removed: Removed<V> = {
            let mut state = self.state.lock();
            let doomed: Vec<String> = state
                .entries
                .keys()
                .filter(|k| !keep(k))
                .cloned()
                .collect();
            doomed
                .into_iter()
                .filter_map(|key| {
                    let entry = state.take(&key)?;
                    Some((key, entry.value, RemovalCause::Explicit))
                })
                .collect()
        };
        let count = removed.len();
        self.notify(removed);
        count
    }

    // == Clear ==
    /// Removes every entry.
    pub fn clear(&self) {
        let removed: Removed<V> = {
            let mut state = self.state.lock();
            state.lru.clear();
            state.total_cost = 0;
            state
                .entries
                .drain()
                .map(|(key, entry)| (key, entry.value, RemovalCause::Explicit))
                .collect()
        };
        self.notify(removed);
    }

    // == Capacity ==
    /// Changes the budget, evicting immediately if it shrank.
    pub fn set_capacity(&self, capacity: u64) {
        let mut removed = Vec::new();
        {
            let mut state = self.state.lock();
            state.capacity = capacity;
            state.trim(&mut removed);
        }
        self.notify(removed);
    }

    pub fn capacity(&self) -> u64 {
        self.state.lock().capacity
    }

    pub fn total_cost(&self) -> u64 {
        self.state.lock().total_cost
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let mut stats = state.stats.clone();
        stats.set_occupancy(state.entries.len(), state.total_cost);
        stats
    }

    fn notify(&self, removed: Removed<V>) {
        let Some(listener) = &self.listener else {
            return;
        };
        for (key, value, cause) in removed {
            listener.on_removal(&key, value, cause);
        }
    }
}
