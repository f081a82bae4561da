//! Decoded Object Cache
//!
//! Keeps a few recently decoded values so repeated lookups skip parsing.

use std::any::Any;
use std::sync::Arc;

use crate::cache::{normalize_key, BoundedMemoryCache, CacheStats};
use crate::freshness::CacheMetadata;

/// Type-erased decoded value.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

struct DecodedEntry {
    value: AnyValue,
    metadata: CacheMetadata,
}

// == Decoded Object Cache ==
/// Count-bounded LRU of decoded values.
///
/// Only clearable as a whole; a lookup with the wrong type is a miss.
pub struct DecodedObjectCache {
    entries: BoundedMemoryCache<DecodedEntry>,
}

impl DecodedObjectCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BoundedMemoryCache::new(capacity as u64),
        }
    }

    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<(Arc<T>, CacheMetadata)> {
        let entry = self.entries.get(normalize_key(key))?;
        let value = Arc::clone(&entry.value).downcast::<T>().ok()?;
        Some((value, entry.metadata))
    }

    pub fn put<T: Any + Send + Sync>(&self, key: &str, value: Arc<T>, metadata: CacheMetadata) {
        self.put_any(key, value, metadata);
    }

    pub fn put_any(&self, key: &str, value: AnyValue, metadata: CacheMetadata) {
        self.entries
            .put(normalize_key(key), Arc::new(DecodedEntry { value, metadata }), 1);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.entries.stats()
    }
}

impl Default for DecodedObjectCache {
    fn default() -> Self {
        Self::new(15)
    }
}
