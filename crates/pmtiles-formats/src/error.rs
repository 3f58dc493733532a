//! Format error types

use crate::compression::Compression;
use thiserror::Error;

/// Errors raised while decoding archive structures
#[derive(Debug, Error)]
pub enum FormatError {
    /// The buffer does not start with the archive magic
    #[error("invalid archive magic: expected \"PMTiles\", got {0:02X?}")]
    InvalidMagic(Vec<u8>),

    /// The archive declares a spec version this reader does not handle
    #[error("unsupported archive version: {0}")]
    UnsupportedVersion(u8),

    /// Not enough bytes to decode a fixed-size structure
    #[error("truncated {what}: need {needed} bytes, got {available}")]
    Truncated {
        /// Structure being decoded
        what: &'static str,
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },

    /// A directory blob decoded into an inconsistent entry list
    #[error("invalid directory: {0}")]
    InvalidDirectory(String),

    /// Buffer ended before a varint terminated, or the varint is too long
    #[error("malformed varint at byte {position}")]
    MalformedVarint {
        /// Cursor position where the varint started
        position: usize,
    },

    /// No codec available for this compression code
    #[error("unsupported compression: {0:?}")]
    UnsupportedCompression(Compression),

    /// Codec reported corrupt input
    #[error("decompression failed: {0}")]
    Decompression(String),

    /// (z, x, y) outside the addressable grid
    #[error("invalid tile coordinate z={z} x={x} y={y}")]
    InvalidTileCoordinate {
        /// Zoom level
        z: u8,
        /// Column
        x: u32,
        /// Row
        y: u32,
    },

    /// Tile id beyond the highest supported zoom level
    #[error("tile id {0} exceeds the maximum supported zoom level")]
    InvalidTileId(u64),

    /// Binary parsing error
    #[error("binary parsing error: {0}")]
    BinRw(#[from] binrw::Error),
}

impl FormatError {
    /// True for the errors that mean the archive bytes are unusable
    /// (bad magic, unsupported version, truncated header, bad directory).
    pub fn is_invalid_format(&self) -> bool {
        matches!(
            self,
            Self::InvalidMagic(_)
                | Self::UnsupportedVersion(_)
                | Self::Truncated { .. }
                | Self::InvalidDirectory(_)
                | Self::BinRw(_)
        )
    }
}

/// Result type for format operations
pub type FormatResult<T> = Result<T, FormatError>;
