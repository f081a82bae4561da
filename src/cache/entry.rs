//! Cache Entry Module
//!
//! The record stored by the byte tiers for every cached network response,
//! and its on-disk encoding.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::memory::ByteSize;
use crate::cache::tiered::ValueCodec;
use crate::error::{CacheError, Result};
use crate::freshness::CacheMetadata;

/// Width of the big-endian header length prefix.
const HEADER_LEN_BYTES: usize = 4;

// == Cached Response ==
/// A network payload plus the metadata needed to judge it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    /// Logical cache key, kept so records can be cleared by criteria
    pub key: String,
    pub metadata: CacheMetadata,
    pub headers: BTreeMap<String, String>,
    pub payload: Vec<u8>,
}

impl CachedResponse {
    pub fn new(key: impl Into<String>, metadata: CacheMetadata, payload: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            metadata,
            headers: BTreeMap::new(),
            payload,
        }
    }

    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

impl ByteSize for CachedResponse {
    fn byte_size(&self) -> u64 {
        let headers: usize = self.headers.iter().map(|(k, v)| k.len() + v.len()).sum();
        (self.payload.len() + self.key.len() + headers) as u64
    }
}

#[derive(Serialize, Deserialize)]
struct RecordHeader {
    key: String,
    metadata: CacheMetadata,
    #[serde(default)]
    headers: BTreeMap<String, String>,
}

// == Response Codec ==
/// Encodes a [`CachedResponse`] as `[header length][JSON header][payload]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseCodec;

impl ResponseCodec {
    fn split(bytes: &[u8]) -> Result<(RecordHeader, &[u8])> {
        if bytes.len() < HEADER_LEN_BYTES {
            return Err(CacheError::Decode("record shorter than its length prefix".into()));
        }
        let (prefix, rest) = bytes.split_at(HEADER_LEN_BYTES);
        let header_len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if header_len > rest.len() {
            return Err(CacheError::Decode(format!(
                "header length {header_len} exceeds record size {}",
                rest.len()
            )));
        }
        let (header, payload) = rest.split_at(header_len);
        Ok((serde_json::from_slice(header)?, payload))
    }
}

impl ValueCodec<CachedResponse> for ResponseCodec {
    fn encode(&self, value: &CachedResponse) -> Result<Vec<u8>> {
        let header = serde_json::to_vec(&RecordHeader {
            key: value.key.clone(),
            metadata: value.metadata,
            headers: value.headers.clone(),
        })?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| CacheError::Decode("record header too large".into()))?;

        let mut bytes = Vec::with_capacity(HEADER_LEN_BYTES + header.len() + value.payload.len());
        bytes.extend_from_slice(&header_len.to_be_bytes());
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(&value.payload);
        Ok(bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<CachedResponse> {
        let (header, payload) = Self::split(bytes)?;
        Ok(CachedResponse {
            key: header.key,
            metadata: header.metadata,
            headers: header.headers,
            payload: payload.to_vec(),
        })
    }

    fn logical_key(&self, bytes: &[u8]) -> Option<String> {
        Self::split(bytes).ok().map(|(header, _)| header.key)
    }
}
