//! Overflow Cache Module
//!
//! Best-effort second RAM tier fed by evictions from the memory tier.
//!
//! Values may disappear at any time without notice. A miss for a key that was
//! stored earlier is a normal outcome, never an error.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::memory::{EvictionListener, RemovalCause};
use crate::cache::LruTracker;

#[derive(Debug)]
struct OverflowState<V> {
    /// Non-owning reference to every handed-off value
    refs: HashMap<String, Weak<V>>,
    /// Strong references to the most recent hand-offs
    soft: HashMap<String, Arc<V>>,
    soft_order: LruTracker,
    soft_capacity: usize,
}

// == Overflow Cache ==
/// Retains evicted values while something keeps them alive.
///
/// Every value is tracked through a weak reference, so it stays reachable
/// for as long as any caller still holds it. The `soft_capacity` most recent
/// hand-offs are additionally kept alive by the tier itself until
/// [`reclaim`](Self::reclaim) drops them.
pub struct OverflowCache<V> {
    state: Mutex<OverflowState<V>>,
}

impl<V> OverflowCache<V> {
    // == Constructor ==
    pub fn new(soft_capacity: usize) -> Self {
        Self {
            state: Mutex::new(OverflowState {
                refs: HashMap::new(),
                soft: HashMap::new(),
                soft_order: LruTracker::new(),
                soft_capacity,
            }),
        }
    }

    // == Put ==
    pub fn put(&self, key: impl Into<String>, value: Arc<V>) {
        let key = key.into();
        let mut state = self.state.lock();
        state.refs.insert(key.clone(), Arc::downgrade(&value));
        if state.soft_capacity == 0 {
            return;
        }
        state.soft_order.touch(&key);
        state.soft.insert(key, value);
        while state.soft.len() > state.soft_capacity {
            match state.soft_order.evict_oldest() {
                Some(oldest) => {
                    state.soft.remove(&oldest);
                }
                None => break,
            }
        }
    }

    // == Get ==
    /// Returns the value if it is still alive.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let mut state = self.state.lock();
        let value = state.refs.get(key)?.upgrade();
        if value.is_none() {
            state.refs.remove(key);
        }
        value
    }

    pub fn remove(&self, key: &str) {
        let mut state = self.state.lock();
        state.refs.remove(key);
        state.soft.remove(key);
        state.soft_order.remove(key);
    }

    /// Removes every entry whose key does not satisfy `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) {
        let mut state = self.state.lock();
        let doomed: Vec<String> = state.refs.keys().filter(|k| !keep(k)).cloned().collect();
        for key in doomed {
            state.refs.remove(&key);
            state.soft.remove(&key);
            state.soft_order.remove(&key);
        }
    }

    // == Reclaim ==
    /// Drops every strong reference held by the tier.
    ///
    /// Values still used elsewhere remain reachable through their weak entry.
    pub fn reclaim(&self) {
        let mut state = self.state.lock();
        let dropped = state.soft.len();
        state.soft.clear();
        state.soft_order.clear();
        debug!(dropped, "overflow tier reclaimed");
    }

    // == Purge ==
    /// Forgets entries whose value is gone, returning how many were dropped.
    pub fn purge(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.refs.len();
        state.refs.retain(|_, weak| weak.strong_count() > 0);
        before - state.refs.len()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.refs.clear();
        state.soft.clear();
        state.soft_order.clear();
    }

    /// Number of tracked keys, including ones whose value may be gone.
    pub fn len(&self) -> usize {
        self.state.lock().refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().refs.is_empty()
    }
}

impl<V: Send + Sync> EvictionListener<V> for OverflowCache<V> {
    /// Only capacity evictions are handed off; replaced or removed values are
    /// gone for good.
    fn on_removal(&self, key: &str, value: Arc<V>, cause: RemovalCause) {
        if cause.was_evicted() {
            self.put(key, value);
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BoundedMemoryCache;

    #[test]
    fn test_put_and_get() {
        let cache = OverflowCache::new(4);
        cache.put("a", Arc::new(1));
        assert_eq!(cache.get("a").as_deref(), Some(&1));
        assert!(cache.get("b").is_none());
    }

    #[test]
    fn test_value_outside_soft_window_lives_while_referenced() {
        let cache = OverflowCache::new(1);
        let held = Arc::new("held".to_string());
        cache.put("a", held.clone());
        cache.put("b", Arc::new("b".to_string()));

        // "a" left the soft window but the caller still holds it
        assert_eq!(cache.get("a").as_deref(), Some(&"held".to_string()));

        drop(held);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }

    #[test]
    fn test_reclaim_drops_unreferenced_values() {
        let cache = OverflowCache::new(8);
        cache.put("a", Arc::new(1));
        let kept = Arc::new(2);
        cache.put("b", kept.clone());

        cache.reclaim();

        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b").as_deref(), Some(&2));
    }

    #[test]
    fn test_purge_counts_dead_entries() {
        let cache = OverflowCache::new(0);
        cache.put("a", Arc::new(1));
        cache.put("b", Arc::new(2));
        let alive = Arc::new(3);
        cache.put("c", alive.clone());

        assert_eq!(cache.purge(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_only_capacity_evictions_are_handed_off() {
        let overflow = Arc::new(OverflowCache::new(8));
        let memory = BoundedMemoryCache::with_listener(2, overflow.clone());

        memory.put("a", Arc::new(1), 1);
        memory.put("b", Arc::new(2), 1);
        memory.put("c", Arc::new(3), 1);
        memory.remove("b");

        assert_eq!(overflow.get("a").as_deref(), Some(&1));
        assert!(overflow.get("b").is_none());
    }

    #[test]
    fn test_retain_and_clear() {
        let cache = OverflowCache::new(8);
        cache.put("/users/1", Arc::new(1));
        cache.put("/items/1", Arc::new(2));

        cache.retain(|k| !k.starts_with("/users"));
        assert!(cache.get("/users/1").is_none());
        assert!(cache.get("/items/1").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }
}
