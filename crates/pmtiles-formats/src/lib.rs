//! Binary format parsers for PMTiles v3 archives
//!
#![allow(clippy::cast_possible_truncation)] // Intentional for binary format parsing
#![allow(clippy::cast_possible_wrap)] // Intentional for E7 coordinates
#![allow(clippy::cast_lossless)] // Sometimes clearer than From
#![allow(clippy::cast_precision_loss)] // E7 coordinate conversion
#![allow(clippy::doc_markdown)] // Format terms don't need backticks
#![allow(clippy::module_name_repetitions)] // Clear naming is preferred
#![allow(clippy::float_cmp)] // Decoded coordinates are compared exactly in tests
#![allow(clippy::return_self_not_must_use)] // Builder patterns
#![allow(clippy::derive_partial_eq_without_eq)] // Header carries f64 fields
//! This crate decodes the pieces of a single-file tile archive that a reader
//! needs before it can serve a tile:
//!
//! - **Varint**: unsigned LEB128 integers used by directory columns
//! - **Tile id**: Hilbert-curve mapping between `(z, x, y)` and a linear id
//! - **Header**: the fixed 127-byte header with region offsets and bounds
//! - **Directory**: columnar entry lists, plus binary search over them
//! - **Compression**: codec identifiers and the pluggable `Decompress` seam
//!
//! Nothing here performs I/O. Readers fetch byte ranges and hand them to
//! these functions.

pub mod compression;
pub mod directory;
pub mod error;
pub mod header;
pub mod tile_id;
pub mod varint;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use compression::{Compression, Decompress, DefaultDecompressor, FnDecompressor, TileType};
pub use directory::{Entry, find_tile, parse_directory};
pub use error::{FormatError, FormatResult};
pub use header::{HEADER_SIZE, Header, bytes_to_header};
pub use tile_id::{tile_id_to_zxy, zxy_to_tile_id};
pub use varint::read_varint;
