//! Error types for cache operations

use std::sync::Arc;

use pmtiles_formats::FormatError;
use pmtiles_protocol::SourceError;
use thiserror::Error;

/// Errors that can occur while filling the cache
#[derive(Debug, Error)]
pub enum CacheError {
    /// Fetched bytes did not decode
    #[error("Format error: {0}")]
    Format(#[from] FormatError),

    /// The source read failed
    #[error("Source error: {0}")]
    Source(SourceError),

    /// The archive changed since its header was read
    #[error("Etag mismatch: expected {expected:?}, got {actual:?}")]
    EtagMismatch {
        /// Etag the cached header carries
        expected: Option<String>,
        /// Etag the source reported
        actual: Option<String>,
    },

    /// The caller's cancellation token fired
    #[error("Request cancelled")]
    Cancelled,

    /// A spawned fetch task panicked or was aborted
    #[error("Fetch task failed: {0}")]
    TaskFailed(String),

    /// Failure of a fetch shared with other callers
    #[error("{0}")]
    Shared(Arc<CacheError>),

    /// A key held a value of the wrong kind
    #[error("Unexpected cache value for {key}: expected {expected}")]
    UnexpectedValue {
        /// Display form of the key
        key: String,
        /// Kind of value the caller wanted
        expected: &'static str,
    },

    /// Invalid cache configuration
    #[error("Invalid cache configuration: {0}")]
    InvalidConfiguration(String),
}

impl From<SourceError> for CacheError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Cancelled => Self::Cancelled,
            other => Self::Source(other),
        }
    }
}

impl CacheError {
    /// Take back ownership of a shared failure when no other caller holds it
    pub(crate) fn from_shared(err: Arc<Self>) -> Self {
        Arc::try_unwrap(err).unwrap_or_else(Self::Shared)
    }

    fn innermost(&self) -> &Self {
        match self {
            Self::Shared(inner) => inner.innermost(),
            other => other,
        }
    }

    /// Whether this is an etag mismatch, looking through shared wrappers
    pub fn is_etag_mismatch(&self) -> bool {
        matches!(self.innermost(), Self::EtagMismatch { .. })
    }

    /// `(expected, actual)` etags of a mismatch, looking through shared wrappers
    pub fn etag_mismatch(&self) -> Option<(Option<&str>, Option<&str>)> {
        match self.innermost() {
            Self::EtagMismatch { expected, actual } => {
                Some((expected.as_deref(), actual.as_deref()))
            }
            _ => None,
        }
    }

    /// Whether the caller's cancellation token ended the operation
    pub fn is_cancelled(&self) -> bool {
        matches!(self.innermost(), Self::Cancelled)
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
