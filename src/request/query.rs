//! Request Model
//!
//! A cacheable query: its key, caching policy and parsers.

use std::time::Duration;

use crate::cache::{size_variant_key, Digest, Family, Placement, Retention};
use crate::request::parser::Parser;

pub const CACHE_TIME_ONE_DAY: Duration = Duration::from_secs(24 * 60 * 60);

// == Decoded Cache Mode ==
/// Whether a request uses the decoded object cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecodedCacheMode {
    #[default]
    Disabled,
    ReadWrite,
    /// Populate the cache without serving from it
    WriteOnly,
}

impl DecodedCacheMode {
    pub fn reads(self) -> bool {
        matches!(self, DecodedCacheMode::ReadWrite)
    }

    pub fn writes(self) -> bool {
        !matches!(self, DecodedCacheMode::Disabled)
    }
}

// == Cache Policy ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// Age after which cached data is refreshed in the background
    pub time_to_refresh: Duration,
    /// Age after which cached data is no longer served
    pub time_to_live: Duration,
    pub decoded: DecodedCacheMode,
    /// Exempt persisted responses from capacity eviction
    pub always_retain: bool,
    pub family: Family,
}

impl CachePolicy {
    /// Never read from or written to any cache.
    pub fn no_cache() -> Self {
        Self {
            time_to_refresh: Duration::ZERO,
            time_to_live: Duration::ZERO,
            decoded: DecodedCacheMode::Disabled,
            always_retain: false,
            family: Family::General,
        }
    }

    pub fn ttl(time_to_refresh: Duration, time_to_live: Duration) -> Self {
        Self {
            time_to_refresh,
            time_to_live,
            ..Self::no_cache()
        }
    }

    pub fn with_decoded(mut self, mode: DecodedCacheMode) -> Self {
        self.decoded = mode;
        self
    }

    pub fn retained(mut self) -> Self {
        self.always_retain = true;
        self
    }

    pub fn in_family(mut self, family: Family) -> Self {
        self.family = family;
        self
    }

    pub fn caches(&self) -> bool {
        !self.time_to_live.is_zero()
    }

    pub(crate) fn placement(&self) -> Placement {
        Placement::Disk {
            family: self.family,
            retention: if self.always_retain {
                Retention::Always
            } else {
                Retention::Normal
            },
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::no_cache()
    }
}

// == Request ==
/// A query whose body parses into `T` and whose error payload into `E`.
pub struct Request<T, E = ()> {
    id: u64,
    key: String,
    policy: CachePolicy,
    parser: Parser<T>,
    error_parser: Option<Parser<E>>,
}

impl<T, E> Request<T, E> {
    /// A request keyed by `url`, not cached until a policy is set.
    pub fn new(id: u64, url: impl Into<String>, parser: Parser<T>) -> Self {
        Self {
            id,
            key: url.into(),
            policy: CachePolicy::no_cache(),
            parser,
            error_parser: None,
        }
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_error_parser(mut self, parser: Parser<E>) -> Self {
        self.error_parser = Some(parser);
        self
    }

    /// Appends `suffix` to the cache key.
    pub fn with_key_suffix(mut self, suffix: &str) -> Self {
        self.key.push_str(suffix);
        self
    }

    /// Makes the request body part of the cache key, for POST-style queries.
    pub fn with_body_key(mut self, body: &[u8]) -> Self {
        let digest = Digest::of(&String::from_utf8_lossy(body));
        self.key.push('#');
        self.key.push_str(digest.as_str());
        self
    }

    /// Tags the key with requested dimensions; all sizes share one slot.
    pub fn with_size_variant(mut self, width: u32, height: u32) -> Self {
        self.key = size_variant_key(width, height, &self.key);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn parser(&self) -> &Parser<T> {
        &self.parser
    }

    pub fn error_parser(&self) -> Option<&Parser<E>> {
        self.error_parser.as_ref()
    }
}
