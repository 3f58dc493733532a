//! Cached values

use std::sync::Arc;

use bytes::Bytes;
use pmtiles_formats::{Entry, Header};

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;

/// A resolved cache entry
#[derive(Debug, Clone)]
pub enum CacheValue {
    Header(Arc<Header>),
    Directory(Arc<[Entry]>),
    Bytes(Bytes),
}

impl CacheValue {
    fn unexpected(key: &CacheKey, expected: &'static str) -> CacheError {
        CacheError::UnexpectedValue {
            key: key.to_string(),
            expected,
        }
    }

    /// True for a header read under an etag other than `current_etag`
    pub fn is_stale_header(&self, current_etag: &str) -> bool {
        matches!(self, Self::Header(header) if header.etag.as_deref() != Some(current_etag))
    }

    pub fn into_header(self, key: &CacheKey) -> CacheResult<Arc<Header>> {
        match self {
            Self::Header(header) => Ok(header),
            _ => Err(Self::unexpected(key, "header")),
        }
    }

    pub fn into_directory(self, key: &CacheKey) -> CacheResult<Arc<[Entry]>> {
        match self {
            Self::Directory(entries) => Ok(entries),
            _ => Err(Self::unexpected(key, "directory")),
        }
    }

    pub fn into_bytes(self, key: &CacheKey) -> CacheResult<Bytes> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            _ => Err(Self::unexpected(key, "bytes")),
        }
    }
}
