//! Cache Families Module
//!
//! One persistent store per content family, all sharing the disk budget.

use std::fs;

use serde::Serialize;
use tracing::{info, warn};

use crate::cache::persistent::{CapacityHint, PersistentCache};
use crate::config::Config;
use crate::error::CacheError;

// == Family ==
/// Persistent store a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// General payloads
    General,
    /// A distinct content type with its own share of the budget
    Distinct,
    /// Small store outside the normal size lifecycle
    Permanent,
}

impl Family {
    pub const ALL: [Family; 3] = [Family::General, Family::Distinct, Family::Permanent];

    pub fn dir_name(self) -> &'static str {
        match self {
            Family::General => "general",
            Family::Distinct => "distinct",
            Family::Permanent => "permanent",
        }
    }
}

// == Cache Families ==
#[derive(Clone)]
pub struct CacheFamilies {
    general: PersistentCache,
    distinct: PersistentCache,
    permanent: PersistentCache,
}

impl CacheFamilies {
    /// Opens every enabled family under `config.cache_dir`.
    ///
    /// Families whose budget comes out as zero run disabled.
    pub fn open(config: &Config) -> Self {
        let budget = resolve_disk_budget(config);
        let (general_budget, distinct_budget) = split_budget(budget, config.distinct_ratio);
        info!(
            budget,
            general_budget,
            distinct_budget,
            permanent_budget = config.permanent_capacity,
            "opening persistent cache families"
        );

        let open = |family: Family, bytes: u64| {
            if bytes == 0 {
                return PersistentCache::disabled();
            }
            PersistentCache::open(
                config.cache_dir.join(family.dir_name()),
                config.format_version,
                CapacityHint::Explicit(bytes),
            )
        };

        Self {
            general: open(Family::General, general_budget),
            distinct: open(Family::Distinct, distinct_budget),
            permanent: open(Family::Permanent, config.permanent_capacity),
        }
    }

    /// Only the general family, backed by `general`.
    pub fn single(general: PersistentCache) -> Self {
        Self {
            general,
            distinct: PersistentCache::disabled(),
            permanent: PersistentCache::disabled(),
        }
    }

    /// No persistent storage at all.
    pub fn disabled() -> Self {
        Self::single(PersistentCache::disabled())
    }

    pub fn get(&self, family: Family) -> &PersistentCache {
        match family {
            Family::General => &self.general,
            Family::Distinct => &self.distinct,
            Family::Permanent => &self.permanent,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Family, &PersistentCache)> {
        Family::ALL.into_iter().map(move |family| (family, self.get(family)))
    }
}

/// Explicit budget, else derived from the free space of the cache directory.
fn resolve_disk_budget(config: &Config) -> u64 {
    let hint = config
        .disk_capacity
        .map_or(CapacityHint::Auto, CapacityHint::Explicit);
    let resolved = fs::create_dir_all(&config.cache_dir)
        .map_err(CacheError::from)
        .and_then(|_| hint.resolve(&config.cache_dir));
    match resolved {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(path = %config.cache_dir.display(), "no persistent budget: {err}");
            0
        }
    }
}

/// Splits `budget` into the general and distinct shares.
pub fn split_budget(budget: u64, distinct_ratio: f64) -> (u64, u64) {
    if distinct_ratio <= 0.0 || distinct_ratio > 1.0 {
        return (budget, 0);
    }
    let distinct = (budget as f64 * distinct_ratio) as u64;
    (budget - distinct, distinct)
}
