//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Default byte budget of the RAM tier.
const DEFAULT_MEMORY_CAPACITY: u64 = 16 * 1024 * 1024;
/// Default byte budget of the permanent disk family.
const DEFAULT_PERMANENT_CAPACITY: u64 = 3 * 1024 * 1024;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory holding one sub-directory per persistent family
    pub cache_dir: PathBuf,
    /// Byte budget of the RAM tier
    pub memory_capacity: u64,
    /// Number of recent hand-offs the overflow tier keeps strongly
    pub overflow_entries: usize,
    /// Number of decoded objects kept for the synchronous hit path
    pub decoded_entries: usize,
    /// Explicit disk budget in bytes, None = derive from device free space
    pub disk_capacity: Option<u64>,
    /// Share of the disk budget given to the distinct content family
    pub distinct_ratio: f64,
    /// Byte budget of the permanent family, 0 = family disabled
    pub permanent_capacity: u64,
    /// Record format version, a change invalidates every stored record
    pub format_version: u32,
    /// Background maintenance interval in seconds
    pub maintenance_interval: u64,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_DIR` - Persistent cache root (default: `<tmp>/respcache`)
    /// - `CACHE_MEMORY_CAPACITY` - RAM tier bytes (default: 16 MiB)
    /// - `CACHE_OVERFLOW_ENTRIES` - Overflow soft window (default: 64)
    /// - `CACHE_DECODED_ENTRIES` - Decoded object entries (default: 15)
    /// - `CACHE_DISK_CAPACITY` - Explicit disk bytes (default: derived)
    /// - `CACHE_DISTINCT_RATIO` - Distinct family share (default: 0.0)
    /// - `CACHE_PERMANENT_CAPACITY` - Permanent family bytes (default: 3 MiB)
    /// - `CACHE_FORMAT_VERSION` - Record format version (default: 1)
    /// - `CACHE_MAINTENANCE_INTERVAL` - Maintenance seconds (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let distinct_ratio = parse_var("CACHE_DISTINCT_RATIO").unwrap_or(defaults.distinct_ratio);

        Self {
            cache_dir: env::var_os("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            memory_capacity: parse_var("CACHE_MEMORY_CAPACITY").unwrap_or(defaults.memory_capacity),
            overflow_entries: parse_var("CACHE_OVERFLOW_ENTRIES")
                .unwrap_or(defaults.overflow_entries),
            decoded_entries: parse_var("CACHE_DECODED_ENTRIES").unwrap_or(defaults.decoded_entries),
            disk_capacity: parse_var("CACHE_DISK_CAPACITY"),
            distinct_ratio: sanitize_ratio(distinct_ratio),
            permanent_capacity: parse_var("CACHE_PERMANENT_CAPACITY")
                .unwrap_or(defaults.permanent_capacity),
            format_version: parse_var("CACHE_FORMAT_VERSION").unwrap_or(defaults.format_version),
            maintenance_interval: parse_var("CACHE_MAINTENANCE_INTERVAL")
                .unwrap_or(defaults.maintenance_interval),
        }
    }

    /// Returns the configuration rooted at `cache_dir`, other values default.
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: env::temp_dir().join("respcache"),
            memory_capacity: DEFAULT_MEMORY_CAPACITY,
            overflow_entries: 64,
            decoded_entries: 15,
            disk_capacity: None,
            distinct_ratio: 0.0,
            permanent_capacity: DEFAULT_PERMANENT_CAPACITY,
            format_version: 1,
            maintenance_interval: 30,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Ratios outside `[0, 1]` disable the distinct family.
fn sanitize_ratio(ratio: f64) -> f64 {
    if (0.0..=1.0).contains(&ratio) {
        ratio
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.memory_capacity, 16 * 1024 * 1024);
        assert_eq!(config.overflow_entries, 64);
        assert_eq!(config.decoded_entries, 15);
        assert_eq!(config.disk_capacity, None);
        assert_eq!(config.distinct_ratio, 0.0);
        assert_eq!(config.format_version, 1);
        assert_eq!(config.maintenance_interval, 30);
    }

    #[test]
    fn test_config_from_env_defaults() {
        for name in [
            "CACHE_MEMORY_CAPACITY",
            "CACHE_OVERFLOW_ENTRIES",
            "CACHE_DECODED_ENTRIES",
            "CACHE_DISK_CAPACITY",
            "CACHE_DISTINCT_RATIO",
            "CACHE_FORMAT_VERSION",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env();
        assert_eq!(config.memory_capacity, 16 * 1024 * 1024);
        assert_eq!(config.decoded_entries, 15);
        assert_eq!(config.disk_capacity, None);
        assert_eq!(config.format_version, 1);
    }

    #[test]
    fn test_ratio_out_of_range_disables_family() {
        assert_eq!(sanitize_ratio(1.5), 0.0);
        assert_eq!(sanitize_ratio(-0.1), 0.0);
        assert_eq!(sanitize_ratio(0.25), 0.25);
    }

    #[test]
    fn test_with_cache_dir() {
        let config = Config::with_cache_dir("/var/cache/app");
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/app"));
        assert_eq!(config.decoded_entries, 15);
    }
}
