//! Compression and tile-type codes, and the decompression seam
//!
//! Directories and metadata are compressed with the header's internal
//! compression; tile payloads with the tile compression. The reader never
//! hard-wires a codec: everything goes through [`Decompress`], so hosts can
//! plug in brotli or zstd support. [`DefaultDecompressor`] covers the codes
//! that need nothing beyond `flate2`.

use crate::error::{FormatError, FormatResult};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Maximum allowed decompression size (256 MB)
///
/// Directories and tiles are small; anything larger than this is treated as
/// a compression bomb.
pub const MAX_DECOMPRESSION_SIZE: usize = 256 * 1024 * 1024;

/// Compression code stored in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Compression {
    /// Unrecognised or unset
    Unknown = 0,
    /// Stored as-is
    None = 1,
    /// gzip (RFC 1952)
    Gzip = 2,
    /// Brotli
    Brotli = 3,
    /// Zstandard
    Zstd = 4,
}

impl Compression {
    /// Parse from byte value; unrecognised codes map to `Unknown`
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::None,
            2 => Self::Gzip,
            3 => Self::Brotli,
            4 => Self::Zstd,
            _ => Self::Unknown,
        }
    }

    /// Wire value
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// HTTP `Content-Encoding` token for re-serving stored bytes
    pub fn content_encoding(self) -> Option<&'static str> {
        match self {
            Self::Gzip => Some("gzip"),
            Self::Brotli => Some("br"),
            Self::Zstd => Some("zstd"),
            Self::None | Self::Unknown => None,
        }
    }
}

/// Tile content type stored in the header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TileType {
    /// Unrecognised or unset
    Unknown = 0,
    /// Mapbox Vector Tile
    Mvt = 1,
    /// PNG image
    Png = 2,
    /// JPEG image
    Jpeg = 3,
    /// WebP image
    Webp = 4,
    /// AVIF image
    Avif = 5,
}

impl TileType {
    /// Parse from byte value; unrecognised codes map to `Unknown`
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            1 => Self::Mvt,
            2 => Self::Png,
            3 => Self::Jpeg,
            4 => Self::Webp,
            5 => Self::Avif,
            _ => Self::Unknown,
        }
    }

    /// Wire value
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// MIME type of a decoded tile
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Mvt => "application/x-protobuf",
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Avif => "image/avif",
            Self::Unknown => "application/octet-stream",
        }
    }

    /// Conventional file extension, without the dot
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mvt => "mvt",
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Avif => "avif",
            Self::Unknown => "bin",
        }
    }
}

/// Decompression supplied by the host
///
/// Implementations must fail with [`FormatError::UnsupportedCompression`]
/// for `Compression::Unknown` and for any codec they do not implement.
#[async_trait]
pub trait Decompress: Send + Sync {
    async fn decompress(&self, data: Bytes, compression: Compression) -> FormatResult<Bytes>;
}

/// Built-in codecs: `None` and `Gzip`
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultDecompressor;

#[async_trait]
impl Decompress for DefaultDecompressor {
    async fn decompress(&self, data: Bytes, compression: Compression) -> FormatResult<Bytes> {
        match compression {
            Compression::None => Ok(data),
            Compression::Gzip => gunzip(&data).map(Bytes::from),
            other => Err(FormatError::UnsupportedCompression(other)),
        }
    }
}

/// Adapts a plain function into a [`Decompress`] implementation
pub struct FnDecompressor<F>(pub F);

#[async_trait]
impl<F> Decompress for FnDecompressor<F>
where
    F: Fn(Bytes, Compression) -> FormatResult<Bytes> + Send + Sync,
{
    async fn decompress(&self, data: Bytes, compression: Compression) -> FormatResult<Bytes> {
        (self.0)(data, compression)
    }
}

/// Inflate a gzip stream, enforcing [`MAX_DECOMPRESSION_SIZE`]
pub fn gunzip(data: &[u8]) -> FormatResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();

    // Read in chunks to enforce size limit
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = decoder
            .read(&mut buffer)
            .map_err(|e| FormatError::Decompression(format!("gzip: {e}")))?;

        if bytes_read == 0 {
            break;
        }

        if decompressed.len() + bytes_read > MAX_DECOMPRESSION_SIZE {
            return Err(FormatError::Decompression(format!(
                "decompressed size exceeds limit of {MAX_DECOMPRESSION_SIZE} bytes"
            )));
        }

        decompressed.extend_from_slice(&buffer[..bytes_read]);
    }

    Ok(decompressed)
}
