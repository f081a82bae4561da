//! Cache Module
//!
//! Tiered response caching: a cost-bounded LRU memory tier, a best-effort
//! overflow tier fed by its evictions, and persistent families on disk.

mod digest;
mod entry;
mod families;
mod lru;
mod memory;
mod overflow;
mod persistent;
mod stats;
mod tiered;


// Re-export public types
pub use digest::{
    normalize_key, size_variant_key, split_size_variant, Digest, SIZE_VARIANT_MARKER,
};
pub use entry::{CachedResponse, ResponseCodec};
pub use families::{split_budget, CacheFamilies, Family};
pub use lru::LruTracker;
pub use memory::{
    BoundedMemoryCache, ByteSize, ByteWeigher, CountWeigher, EvictionListener, RemovalCause,
    Weigher,
};
pub use overflow::OverflowCache;
pub use persistent::{
    auto_capacity, available_space, CapacityHint, PersistentCache, PersistentStats, PutOutcome,
    Retention, AUTO_CAPACITY_CEILING, FREE_SPACE_RESERVE,
};
pub use stats::{CacheStats, TierStats};
pub use tiered::{Placement, ResponseStore, TieredSnapshot, TieredValueCache, ValueCodec};
