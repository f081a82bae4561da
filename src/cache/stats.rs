//! Cache Statistics Module
//!
//! Tracks per-tier hits, misses and evictions, plus the composed tier view.

use serde::Serialize;

// == Cache Stats ==
/// Counters of a single evicting tier.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Number of successful retrievals
    pub hits: u64,
    /// Number of retrievals that found nothing
    pub misses: u64,
    /// Number of entries evicted because the budget was exceeded
    pub evictions: u64,
    /// Current number of entries
    pub total_entries: usize,
    /// Current accounted cost of all entries
    pub total_cost: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    /// Updates the occupancy snapshot.
    pub fn set_occupancy(&mut self, entries: usize, cost: u64) {
        self.total_entries = entries;
        self.total_cost = cost;
    }
}

// == Tier Stats ==
/// Where reads of the composed cache were answered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TierStats {
    pub memory_hits: u64,
    pub overflow_hits: u64,
    pub disk_hits: u64,
    pub misses: u64,
    /// Persistent records that could not be decoded and were served as misses
    pub decode_failures: u64,
    /// Records committed to the persistent tier
    pub disk_writes: u64,
}

impl TierStats {
    /// Share of reads answered by any tier.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.memory_hits + self.overflow_hits + self.disk_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
