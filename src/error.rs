//! Error types for the response cache
//!
//! Provides unified error handling using thiserror.

use std::io;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache tiers and the request coordinator.
///
/// Only the network variants ever reach a request caller. Decode and storage
/// errors are absorbed by the tier that hit them and degrade to a cache miss.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The network could not be reached, or the connection dropped
    #[error("Network unreachable: {0}")]
    TransientNetwork(String),

    /// The server answered with a client-side rejection (4xx)
    #[error("Request rejected by server (status {status})")]
    ServerRejected { status: u16 },

    /// The server failed to process the request (5xx or no status)
    #[error("Server error (status {status:?})")]
    ServerError { status: Option<u16> },

    /// The server refused the credentials
    #[error("Not authorized")]
    AuthFailure,

    /// A payload could not be decoded
    #[error("Decode failure: {0}")]
    Decode(String),

    /// No usable storage for the persistent tier
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// An I/O error while reading or writing the persistent tier
    #[error("Storage I/O error: {0}")]
    StorageIo(#[from] io::Error),
}

impl CacheError {
    /// Returns true for errors raised by the cache itself rather than the network.
    pub fn is_cache_local(&self) -> bool {
        matches!(
            self,
            CacheError::Decode(_) | CacheError::StorageUnavailable(_) | CacheError::StorageIo(_)
        )
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Decode(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_local_classification() {
        assert!(CacheError::Decode("bad".into()).is_cache_local());
        assert!(CacheError::StorageUnavailable("ro".into()).is_cache_local());
        assert!(CacheError::from(io::Error::other("disk")).is_cache_local());
        assert!(!CacheError::AuthFailure.is_cache_local());
        assert!(!CacheError::ServerError { status: Some(500) }.is_cache_local());
    }

    #[test]
    fn test_json_error_maps_to_decode() {
        let err = serde_json::from_slice::<u32>(b"nope").unwrap_err();
        assert!(matches!(CacheError::from(err), CacheError::Decode(_)));
    }
}
