//! Freshness Policy
//!
//! Classifies a cached entry from its soft and hard expiry and decides what
//! the network has to do about it.
//!
//! | now                     | freshness        | fetch       |
//! |-------------------------|------------------|-------------|
//! | `now < soft`            | `Fresh`          | none        |
//! | `soft <= now < hard`    | `StaleButUsable` | background  |
//! | `now >= hard`, no entry | `Expired`        | blocking    |
//!
//! The hard expiry always wins, so an entry whose soft expiry lies after its
//! hard expiry is fresh until the hard expiry and expired afterwards.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// == Freshness ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Freshness {
    /// Serve, no network action
    Fresh,
    /// Serve now and refresh in the background; a second delivery follows
    StaleButUsable,
    /// Do not serve, fetch before delivering anything
    Expired,
}

impl Freshness {
    pub fn is_servable(self) -> bool {
        !matches!(self, Freshness::Expired)
    }

    pub fn fetch_decision(self) -> FetchDecision {
        match self {
            Freshness::Fresh => FetchDecision::None,
            Freshness::StaleButUsable => FetchDecision::Background,
            Freshness::Expired => FetchDecision::Blocking,
        }
    }
}

/// How a network refresh must be issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    None,
    /// Issue while the cached value is being served
    Background,
    /// Nothing is delivered before the fetch completes
    Blocking,
}

// == Cache Metadata ==
/// Freshness bookkeeping stored next to every cached payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the server produced the payload (Unix ms)
    pub server_timestamp: u64,
    /// After this instant the payload triggers a background refresh
    pub soft_expiry: u64,
    /// After this instant the payload must not be served
    pub hard_expiry: u64,
    /// Exempt from capacity eviction, not from expiry
    #[serde(default)]
    pub always_retain: bool,
}

impl CacheMetadata {
    /// Computes expiries for a payload received at `now`.
    ///
    /// A zero `time_to_refresh` means no stale window: the soft expiry equals
    /// the hard one.
    pub fn from_ttl(
        server_timestamp: u64,
        now: u64,
        time_to_refresh: Duration,
        time_to_live: Duration,
    ) -> Self {
        let hard_expiry = now.saturating_add(time_to_live.as_millis() as u64);
        let soft_expiry = if time_to_refresh.is_zero() {
            hard_expiry
        } else {
            now.saturating_add(time_to_refresh.as_millis() as u64)
        };
        Self {
            server_timestamp,
            soft_expiry,
            hard_expiry,
            always_retain: false,
        }
    }

    pub fn retained(mut self, always_retain: bool) -> Self {
        self.always_retain = always_retain;
        self
    }

    pub fn classify(&self, now: u64) -> Freshness {
        FreshnessPolicy::classify(Some(self), now)
    }
}

// == Freshness Policy ==
pub struct FreshnessPolicy;

impl FreshnessPolicy {
    /// Classifies `entry` at `now`; a missing entry is always expired.
    pub fn classify(entry: Option<&CacheMetadata>, now: u64) -> Freshness {
        let Some(entry) = entry else {
            return Freshness::Expired;
        };
        if now >= entry.hard_expiry {
            Freshness::Expired
        } else if now >= entry.soft_expiry {
            Freshness::StaleButUsable
        } else {
            Freshness::Fresh
        }
    }

    pub fn decide(entry: Option<&CacheMetadata>, now: u64) -> FetchDecision {
        Self::classify(entry, now).fetch_decision()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(soft: u64, hard: u64) -> CacheMetadata {
        CacheMetadata {
            server_timestamp: 0,
            soft_expiry: soft,
            hard_expiry: hard,
            always_retain: false,
        }
    }

    #[test]
    fn test_boundaries() {
        let entry = meta(100, 500);
        assert_eq!(entry.classify(99), Freshness::Fresh);
        assert_eq!(entry.classify(100), Freshness::StaleButUsable);
        assert_eq!(entry.classify(499), Freshness::StaleButUsable);
        assert_eq!(entry.classify(500), Freshness::Expired);
    }

    #[test]
    fn test_zero_ttl_is_always_expired() {
        let entry = meta(0, 0);
        for now in [0, 1, 1_000, u64::MAX] {
            assert_eq!(entry.classify(now), Freshness::Expired);
        }
    }

    #[test]
    fn test_missing_entry_requires_blocking_fetch() {
        assert_eq!(FreshnessPolicy::classify(None, 42), Freshness::Expired);
        assert_eq!(FreshnessPolicy::decide(None, 42), FetchDecision::Blocking);
    }

    #[test]
    fn test_soft_after_hard_is_handled() {
        let entry = meta(900, 500);
        assert_eq!(entry.classify(499), Freshness::Fresh);
        assert_eq!(entry.classify(500), Freshness::Expired);
        assert_eq!(entry.classify(950), Freshness::Expired);
    }

    #[test]
    fn test_retention_does_not_affect_expiry() {
        let entry = meta(10, 20).retained(true);
        assert_eq!(entry.classify(25), Freshness::Expired);
    }

    #[test]
    fn test_fetch_decisions() {
        assert_eq!(Freshness::Fresh.fetch_decision(), FetchDecision::None);
        assert_eq!(
            Freshness::StaleButUsable.fetch_decision(),
            FetchDecision::Background
        );
        assert_eq!(Freshness::Expired.fetch_decision(), FetchDecision::Blocking);
        assert!(!Freshness::Expired.is_servable());
    }

    #[test]
    fn test_from_ttl() {
        let m = CacheMetadata::from_ttl(
            7,
            1_000,
            Duration::from_millis(100),
            Duration::from_millis(500),
        );
        assert_eq!(m.server_timestamp, 7);
        assert_eq!(m.soft_expiry, 1_100);
        assert_eq!(m.hard_expiry, 1_500);

        let no_refresh =
            CacheMetadata::from_ttl(0, 1_000, Duration::ZERO, Duration::from_millis(500));
        assert_eq!(no_refresh.soft_expiry, 1_500);

        let no_cache = CacheMetadata::from_ttl(0, 1_000, Duration::ZERO, Duration::ZERO);
        assert_eq!(no_cache.classify(1_000), Freshness::Expired);
    }
}
