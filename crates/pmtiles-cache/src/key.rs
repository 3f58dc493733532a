//! Cache keys

use std::fmt;

/// What a cache entry holds
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// The archive header
    Header,
    /// A decoded directory at an archive offset
    Directory {
        /// Etag of the header the offset came from
        etag: Option<String>,
        /// Absolute archive offset
        offset: u64,
        /// Stored (compressed) length
        length: u64,
    },
    /// Raw bytes at an archive offset
    Bytes {
        /// Etag of the header the offset came from
        etag: Option<String>,
        /// Absolute archive offset
        offset: u64,
        /// Length in bytes
        length: u64,
    },
}

/// Key of one cache entry, namespaced by the source it came from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// [`Source::key`](pmtiles_protocol::Source::key) of the archive
    pub source: String,
    /// Entry kind and position
    pub kind: KeyKind,
}

impl CacheKey {
    pub fn header(source: &str) -> Self {
        Self {
            source: source.to_string(),
            kind: KeyKind::Header,
        }
    }

    pub fn directory(source: &str, etag: Option<&str>, offset: u64, length: u64) -> Self {
        Self {
            source: source.to_string(),
            kind: KeyKind::Directory {
                etag: etag.map(str::to_string),
                offset,
                length,
            },
        }
    }

    pub fn bytes(source: &str, etag: Option<&str>, offset: u64, length: u64) -> Self {
        Self {
            source: source.to_string(),
            kind: KeyKind::Bytes {
                etag: etag.map(str::to_string),
                offset,
                length,
            },
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            KeyKind::Header => write!(f, "{}", self.source),
            KeyKind::Directory {
                etag,
                offset,
                length,
            }
            | KeyKind::Bytes {
                etag,
                offset,
                length,
            } => write!(
                f,
                "{}|{}|{offset}|{length}",
                self.source,
                etag.as_deref().unwrap_or_default()
            ),
        }
    }
}
