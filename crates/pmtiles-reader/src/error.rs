//! Error types for archive reads

use pmtiles_cache::CacheError;
use pmtiles_formats::FormatError;
use pmtiles_protocol::SourceError;
use thiserror::Error;

/// Errors returned by [`Archive`](crate::Archive)
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Header, directory or byte-range fetch failed
    #[error(transparent)]
    Cache(CacheError),

    /// Tile or metadata bytes did not decode
    #[error(transparent)]
    Format(#[from] FormatError),

    /// Reading tile bytes failed
    #[error(transparent)]
    Source(SourceError),

    /// Metadata is not valid JSON, or not the requested shape
    #[error("Malformed metadata: {0}")]
    MalformedMetadata(#[from] serde_json::Error),

    /// Leaf directories nest deeper than allowed
    #[error("Tile {tile_id} not resolved within {max_depth} directories")]
    DirectoryDepthExceeded {
        /// Tile id being resolved
        tile_id: u64,
        /// Directories visited before giving up
        max_depth: u8,
    },

    /// The caller's cancellation token fired
    #[error("Request cancelled")]
    Cancelled,

    /// Invalid reader configuration
    #[error("Invalid reader configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<CacheError> for ReaderError {
    fn from(err: CacheError) -> Self {
        if err.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Cache(err)
        }
    }
}

impl From<SourceError> for ReaderError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Cancelled => Self::Cancelled,
            other => Self::Source(other),
        }
    }
}

impl ReaderError {
    /// `(expected, actual)` etags when the archive changed mid-read
    pub fn etag_mismatch(&self) -> Option<(Option<&str>, Option<&str>)> {
        match self {
            Self::Cache(err) => err.etag_mismatch(),
            _ => None,
        }
    }

    /// Whether the archive changed since its header was read
    pub fn is_etag_mismatch(&self) -> bool {
        self.etag_mismatch().is_some()
    }

    /// Whether the caller's cancellation token ended the read
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type for archive reads
pub type ReaderResult<T> = Result<T, ReaderError>;
