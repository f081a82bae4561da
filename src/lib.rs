//! respcache - A tiered client-side response cache
//!
//! Serves request results from memory, an overflow tier or disk, and decides
//! when cached data is fresh, usable while refreshing, or expired.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod freshness;
pub mod request;
pub mod tasks;

pub use cache::{ResponseStore, TieredValueCache};
pub use config::Config;
pub use error::{CacheError, Result};
pub use freshness::{CacheMetadata, Freshness, FreshnessPolicy};
pub use request::RequestCacheCoordinator;
pub use tasks::spawn_maintenance_task;
