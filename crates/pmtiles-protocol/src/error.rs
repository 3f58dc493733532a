//! Error types for byte-range sources

use thiserror::Error;

/// Error returned by a [`Source`](crate::Source) read
#[derive(Debug, Error)]
pub enum SourceError {
    /// Local I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network request failed
    #[error("Network request failed: {source}")]
    NetworkRequest {
        /// The underlying network error
        #[source]
        source: reqwest::Error,
    },

    /// HTTP client could not be built
    #[error("HTTP client setup failed: {source}")]
    HttpClientSetup {
        /// The underlying client setup error
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("HTTP request failed with status {status_code} for URL: {url}")]
    HttpStatus {
        /// HTTP status code returned by the server
        status_code: u16,
        /// The URL that generated the error
        url: String,
    },

    /// Server ignored the `Range` header and sent more than was asked for
    #[error(
        "Server returned {received} bytes for a {requested}-byte range at {url}; \
         check that the backend supports HTTP byte serving"
    )]
    RangeNotSupported {
        /// The URL that does not honour ranges
        url: String,
        /// Bytes requested
        requested: u64,
        /// Bytes the server returned
        received: u64,
    },

    /// Location could not be parsed as a URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// A configured request header is not a valid HTTP header
    #[error("Invalid header {name}: {reason}")]
    InvalidHeader {
        /// Header name as configured
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// The caller cancelled the read
    #[error("Request cancelled")]
    Cancelled,
}

impl SourceError {
    /// Whether the read was abandoned through a cancellation token
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result alias for source reads
pub type SourceResult<T> = Result<T, SourceError>;
