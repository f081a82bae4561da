//! Tiered Value Cache Module
//!
//! Memory, overflow and persistent tiers behind one get/put contract.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::cache::entry::{CachedResponse, ResponseCodec};
use crate::cache::families::{CacheFamilies, Family};
use crate::cache::memory::{BoundedMemoryCache, ByteWeigher, Weigher};
use crate::cache::overflow::OverflowCache;
use crate::cache::persistent::{PersistentStats, PutOutcome, Retention};
use crate::cache::{normalize_key, CacheStats, Digest, TierStats};
use crate::config::Config;
use crate::error::Result;

// == Value Codec ==
/// Converts values to and from the bytes kept by the persistent tier.
pub trait ValueCodec<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<V>;

    /// Logical key recorded inside an encoded value, if the format keeps one.
    fn logical_key(&self, _bytes: &[u8]) -> Option<String> {
        None
    }
}

// == Placement ==
/// Which tiers a put reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// RAM tiers only
    Memory,
    /// RAM tiers plus the persistent store of `family`
    Disk { family: Family, retention: Retention },
}

impl Placement {
    pub fn disk(family: Family) -> Self {
        Placement::Disk {
            family,
            retention: Retention::Normal,
        }
    }

    pub fn retained(family: Family) -> Self {
        Placement::Disk {
            family,
            retention: Retention::Always,
        }
    }
}

// == Snapshot ==
#[derive(Debug, Clone, Serialize)]
pub struct TieredSnapshot {
    pub tiers: TierStats,
    pub memory: CacheStats,
    pub overflow_entries: usize,
    pub families: Vec<(Family, PersistentStats)>,
}

// == Tiered Value Cache ==
/// Reads go memory → overflow → persistent store; a hit below the memory tier
/// is copied back into it. Writes reach memory and, when requested, the
/// persistent store, independently of each other.
///
/// Keys carrying a size-variant tag are normalized before every lookup.
pub struct TieredValueCache<V, C> {
    memory: BoundedMemoryCache<V>,
    overflow: Arc<OverflowCache<V>>,
    disk: CacheFamilies,
    codec: C,
    weigher: Box<dyn Weigher<V>>,
    stats: Mutex<TierStats>,
}

impl<V, C> TieredValueCache<V, C>
where
    V: Send + Sync + 'static,
    C: ValueCodec<V>,
{
    // == Constructor ==
    /// Wires the tiers: memory evictions are handed to the overflow tier.
    pub fn new(
        memory_capacity: u64,
        overflow_entries: usize,
        disk: CacheFamilies,
        codec: C,
        weigher: impl Weigher<V> + 'static,
    ) -> Self {
        let overflow = Arc::new(OverflowCache::new(overflow_entries));
        let memory = BoundedMemoryCache::with_listener(memory_capacity, overflow.clone());
        Self {
            memory,
            overflow,
            disk,
            codec,
            weigher: Box::new(weigher),
            stats: Mutex::new(TierStats::default()),
        }
    }

    // == Get ==
    /// Looks `key` up in the general family.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.get_from(key, Family::General)
    }

    /// Looks `key` up, falling back to the persistent store of `family`.
    ///
    /// The RAM tiers hold one value per logical key whatever family it was
    /// written for; `family` only selects the store read on a RAM miss.
    /// Undecodable records are dropped and reported as misses.
    pub fn get_from(&self, key: &str, family: Family) -> Option<Arc<V>> {
        let key = normalize_key(key);

        if let Some(value) = self.memory.get(key) {
            self.stats.lock().memory_hits += 1;
            return Some(value);
        }

        if let Some(value) = self.overflow.get(key) {
            trace!(key, "overflow hit");
            self.warm(key, &value);
            self.stats.lock().overflow_hits += 1;
            return Some(value);
        }

        let store = self.disk.get(family);
        let digest = Digest::of(key);
        let Some(bytes) = store.get(&digest) else {
            self.stats.lock().misses += 1;
            return None;
        };

        match self.codec.decode(&bytes) {
            Ok(value) => {
                let value = Arc::new(value);
                self.warm(key, &value);
                self.stats.lock().disk_hits += 1;
                Some(value)
            }
            Err(err) => {
                debug!(key, "dropping undecodable persistent record: {err}");
                store.remove(&digest);
                let mut stats = self.stats.lock();
                stats.decode_failures += 1;
                stats.misses += 1;
                None
            }
        }
    }

    // == Put ==
    /// Stores `value`, costing it with the configured weigher.
    pub fn put(&self, key: &str, value: Arc<V>, placement: Placement) {
        let cost = self.weigher.cost(&value);
        self.put_weighted(key, value, cost, placement);
    }

    /// Stores `value` with an explicit memory cost.
    pub fn put_weighted(&self, key: &str, value: Arc<V>, cost: u64, placement: Placement) {
        let key = normalize_key(key);

        if let Placement::Disk { family, retention } = placement {
            self.persist(key, &value, family, retention);
        }
        self.memory.put(key, value, cost);
    }

    fn persist(&self, key: &str, value: &V, family: Family, retention: Retention) {
        let bytes = match self.codec.encode(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key, "cannot encode value for the persistent tier: {err}");
                return;
            }
        };
        match self.disk.get(family).put_with(&Digest::of(key), &bytes, retention) {
            PutOutcome::Committed => self.stats.lock().disk_writes += 1,
            outcome => trace!(key, ?outcome, "persistent write not committed"),
        }
    }

    fn warm(&self, key: &str, value: &Arc<V>) {
        self.memory
            .put(key, Arc::clone(value), self.weigher.cost(value));
    }

    // == Remove ==
    /// Removes `key` from every tier and family.
    pub fn remove(&self, key: &str) {
        let key = normalize_key(key);
        self.memory.remove(key);
        self.overflow.remove(key);
        let digest = Digest::of(key);
        for (_, store) in self.disk.iter() {
            store.remove(&digest);
        }
    }

    /// Removes every entry whose logical key satisfies `matches`.
    ///
    /// Persistent records are matched through the codec's recorded key; formats
    /// without one are left untouched. Returns the number of persistent
    /// records removed.
    pub fn remove_where(&self, matches: impl Fn(&str) -> bool) -> usize {
        self.memory.retain(|key| !matches(key));
        self.overflow.retain(|key| !matches(key));

        self.disk
            .iter()
            .map(|(_, store)| {
                store.remove_where(|_, bytes| {
                    self.codec
                        .logical_key(bytes)
                        .is_some_and(|key| matches(normalize_key(&key)))
                })
            })
            .sum()
    }

    // == Clear ==
    /// Empties every tier. Storage errors are logged, not returned.
    pub fn clear(&self) {
        self.memory.clear();
        self.overflow.clear();
        for (family, store) in self.disk.iter() {
            if let Err(err) = store.delete() {
                warn!(family = family.dir_name(), "failed to clear persistent family: {err}");
            }
        }
    }

    // == Maintenance ==
    /// Forgets reclaimed overflow values and enforces every disk budget.
    ///
    /// Returns the number of overflow entries purged.
    pub fn maintain(&self) -> usize {
        let purged = self.overflow.purge();
        for (_, store) in self.disk.iter() {
            store.trim();
        }
        purged
    }

    pub fn memory(&self) -> &BoundedMemoryCache<V> {
        &self.memory
    }

    pub fn overflow(&self) -> &OverflowCache<V> {
        &self.overflow
    }

    pub fn families(&self) -> &CacheFamilies {
        &self.disk
    }

    // == Stats ==
    pub fn stats(&self) -> TierStats {
        self.stats.lock().clone()
    }

    pub fn snapshot(&self) -> TieredSnapshot {
        TieredSnapshot {
            tiers: self.stats(),
            memory: self.memory.stats(),
            overflow_entries: self.overflow.len(),
            families: self
                .disk
                .iter()
                .map(|(family, store)| (family, store.stats()))
                .collect(),
        }
    }
}

// == Response Store ==
/// The tiered cache of raw network responses.
pub type ResponseStore = TieredValueCache<CachedResponse, ResponseCodec>;

impl TieredValueCache<CachedResponse, ResponseCodec> {
    /// Byte-weighted response cache with every family opened from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.memory_capacity,
            config.overflow_entries,
            CacheFamilies::open(config),
            ResponseCodec,
            ByteWeigher,
        )
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::CountWeigher;
    use crate::cache::persistent::{CapacityHint, PersistentCache};
    use crate::error::CacheError;
    use tempfile::TempDir;

    /// Stores strings as UTF-8, embedding the key as `key\n` before the value.
    struct TextCodec;

    impl ValueCodec<String> for TextCodec {
        fn encode(&self, value: &String) -> Result<Vec<u8>> {
            Ok(value.as_bytes().to_vec())
        }

        fn decode(&self, bytes: &[u8]) -> Result<String> {
            let text = String::from_utf8(bytes.to_vec())
                .map_err(|e| CacheError::Decode(e.to_string()))?;
            if text.starts_with("corrupt") {
                return Err(CacheError::Decode("corrupt".into()));
            }
            Ok(text)
        }

        fn logical_key(&self, bytes: &[u8]) -> Option<String> {
            let text = std::str::from_utf8(bytes).ok()?;
            text.split_once('=').map(|(key, _)| key.to_string())
        }
    }

    fn tiered(dir: &TempDir, memory: u64, overflow: usize) -> TieredValueCache<String, TextCodec> {
        let disk = PersistentCache::open(dir.path(), 1, CapacityHint::Explicit(1 << 20));
        TieredValueCache::new(
            memory,
            overflow,
            CacheFamilies::single(disk),
            TextCodec,
            CountWeigher,
        )
    }

    fn value(s: &str) -> Arc<String> {
        Arc::new(s.to_string())
    }

    #[test]
    fn test_memory_hit() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, 4, 4);
        cache.put("a", value("a=1"), Placement::Memory);

        assert_eq!(cache.get("a").as_deref(), Some(&"a=1".to_string()));
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[test]
    fn test_evicted_value_comes_back_from_overflow() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, 1, 4);
        cache.put("a", value("a=1"), Placement::Memory);
        cache.put("b", value("b=2"), Placement::Memory);

        assert!(!cache.memory().contains("a"));
        assert_eq!(cache.get("a").as_deref(), Some(&"a=1".to_string()));
        assert_eq!(cache.stats().overflow_hits, 1);
        // warmed back into memory
        assert!(cache.memory().contains("a"));
    }

    #[test]
    fn test_disk_hit_after_ram_tiers_lost() {
        let dir = TempDir::new().unwrap();
        {
            let cache = tiered(&dir, 4, 4);
            cache.put("a", value("a=1"), Placement::disk(Family::General));
            assert_eq!(cache.stats().disk_writes, 1);
        }

        let cache = tiered(&dir, 4, 4);
        assert_eq!(cache.get("a").as_deref(), Some(&"a=1".to_string()));
        assert_eq!(cache.stats().disk_hits, 1);
        assert!(cache.memory().contains("a"));
    }

    #[test]
    fn test_decode_failure_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, 4, 0);
        cache.put("a", value("corrupt"), Placement::disk(Family::General));
        cache.memory().clear();
        cache.overflow().clear();

        assert!(cache.get("a").is_none());
        let stats = cache.stats();
        assert_eq!(stats.decode_failures, 1);
        assert_eq!(stats.misses, 1);
        assert!(!cache.families().get(Family::General).contains(&Digest::of("a")));
    }

    #[test]
    fn test_size_variants_share_a_slot() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, 4, 4);
        cache.put("#W100#H50img", value("img=small"), Placement::disk(Family::General));

        assert_eq!(cache.get("#W0#H0img").as_deref(), Some(&"img=small".to_string()));
        assert_eq!(cache.get("img").as_deref(), Some(&"img=small".to_string()));
        assert_eq!(cache.families().get(Family::General).stats().entries, 1);
    }

    #[test]
    fn test_disabled_disk_still_caches_in_memory() {
        let cache: TieredValueCache<String, TextCodec> =
            TieredValueCache::new(4, 4, CacheFamilies::disabled(), TextCodec, CountWeigher);
        cache.put("a", value("a=1"), Placement::disk(Family::General));

        assert!(cache.get("a").is_some());
        assert_eq!(cache.stats().disk_writes, 0);
    }

    #[test]
    fn test_remove_where_reaches_every_tier() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, 1, 4);
        cache.put("/users/1", value("/users/1=a"), Placement::disk(Family::General));
        cache.put("/items/1", value("/items/1=b"), Placement::disk(Family::General));

        let removed = cache.remove_where(|key| key.starts_with("/users"));
        assert_eq!(removed, 1);
        assert!(cache.get("/users/1").is_none());
        assert!(cache.get("/items/1").is_some());
    }

    #[test]
    fn test_remove_where_matches_untagged_key_of_sized_record() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, 4, 4);
        // The recorded key still carries its size tag
        let tagged = "#W10#H10img";
        cache.put(tagged, value("#W10#H10img=1"), Placement::disk(Family::General));
        cache.memory().clear();

        assert_eq!(cache.remove_where(|key| key == "img"), 1);
        assert!(cache.get("img").is_none());
    }

    #[test]
    fn test_family_only_scopes_the_persistent_tier() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, 4, 4);
        cache.put("a", value("a=1"), Placement::disk(Family::General));

        // Served from memory for any family
        assert!(cache.get_from("a", Family::Permanent).is_some());

        cache.memory().clear();
        cache.overflow().clear();
        assert!(cache.get_from("a", Family::Permanent).is_none());
        assert!(cache.get_from("a", Family::General).is_some());
    }

    #[test]
    fn test_remove_and_clear() {
        let dir = TempDir::new().unwrap();
        let cache = tiered(&dir, 4, 4);
        cache.put("a", value("a=1"), Placement::disk(Family::General));
        cache.put("b", value("b=2"), Placement::disk(Family::General));

        cache.remove("a");
        assert!(cache.get("a").is_none());

        cache.clear();
        assert!(cache.get("b").is_none());
        assert_eq!(cache.snapshot().families[0].1.entries, 0);
    }
}
