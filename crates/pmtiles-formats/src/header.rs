//! Fixed-size archive header
//!
//! The header occupies the first 127 bytes of every archive: a 7-byte magic,
//! a version byte, four region descriptors, tile counts, codec and type
//! codes, and the zoom/geographic bounds.

use binrw::{BinRead, binrw, io::Cursor};
use serde::Serialize;

use crate::compression::{Compression, TileType};
use crate::error::{FormatError, FormatResult};

/// Archive magic bytes
pub const MAGIC: [u8; 7] = *b"PMTiles";

/// The only spec version this reader decodes
pub const SPEC_VERSION: u8 = 3;

/// Encoded header size in bytes
pub const HEADER_SIZE: usize = 127;

/// Bytes following magic and version, in wire order
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawHeader {
    pub(crate) root_directory_offset: u64,
    pub(crate) root_directory_length: u64,
    pub(crate) json_metadata_offset: u64,
    pub(crate) json_metadata_length: u64,
    pub(crate) leaf_directory_offset: u64,
    pub(crate) leaf_directory_length: u64,
    pub(crate) tile_data_offset: u64,
    pub(crate) tile_data_length: u64,
    pub(crate) num_addressed_tiles: u64,
    pub(crate) num_tile_entries: u64,
    pub(crate) num_tile_contents: u64,
    pub(crate) clustered: u8,
    pub(crate) internal_compression: u8,
    pub(crate) tile_compression: u8,
    pub(crate) tile_type: u8,
    pub(crate) min_zoom: u8,
    pub(crate) max_zoom: u8,
    pub(crate) min_lon_e7: i32,
    pub(crate) min_lat_e7: i32,
    pub(crate) max_lon_e7: i32,
    pub(crate) max_lat_e7: i32,
    pub(crate) center_zoom: u8,
    pub(crate) center_lon_e7: i32,
    pub(crate) center_lat_e7: i32,
}

/// Decoded archive header
///
/// Immutable once parsed. `etag` records the version of the remote object the
/// header was read from; a changed etag means a new header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Header {
    pub spec_version: u8,
    pub root_directory_offset: u64,
    pub root_directory_length: u64,
    pub json_metadata_offset: u64,
    pub json_metadata_length: u64,
    pub leaf_directory_offset: u64,
    pub leaf_directory_length: u64,
    pub tile_data_offset: u64,
    pub tile_data_length: u64,
    pub num_addressed_tiles: u64,
    pub num_tile_entries: u64,
    pub num_tile_contents: u64,
    pub clustered: bool,
    /// Codec for directories and metadata
    pub internal_compression: Compression,
    /// Codec for tile payloads
    pub tile_compression: Compression,
    pub tile_type: TileType,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
    pub center_zoom: u8,
    pub center_lon: f64,
    pub center_lat: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

fn from_e7(value: i32) -> f64 {
    f64::from(value) / 10_000_000.0
}

fn to_e7(value: f64) -> i32 {
    (value * 10_000_000.0).round() as i32
}

impl From<RawHeader> for Header {
    fn from(raw: RawHeader) -> Self {
        Self {
            spec_version: SPEC_VERSION,
            root_directory_offset: raw.root_directory_offset,
            root_directory_length: raw.root_directory_length,
            json_metadata_offset: raw.json_metadata_offset,
            json_metadata_length: raw.json_metadata_length,
            leaf_directory_offset: raw.leaf_directory_offset,
            leaf_directory_length: raw.leaf_directory_length,
            tile_data_offset: raw.tile_data_offset,
            tile_data_length: raw.tile_data_length,
            num_addressed_tiles: raw.num_addressed_tiles,
            num_tile_entries: raw.num_tile_entries,
            num_tile_contents: raw.num_tile_contents,
            clustered: raw.clustered == 1,
            internal_compression: Compression::from_byte(raw.internal_compression),
            tile_compression: Compression::from_byte(raw.tile_compression),
            tile_type: TileType::from_byte(raw.tile_type),
            min_zoom: raw.min_zoom,
            max_zoom: raw.max_zoom,
            min_lon: from_e7(raw.min_lon_e7),
            min_lat: from_e7(raw.min_lat_e7),
            max_lon: from_e7(raw.max_lon_e7),
            max_lat: from_e7(raw.max_lat_e7),
            center_zoom: raw.center_zoom,
            center_lon: from_e7(raw.center_lon_e7),
            center_lat: from_e7(raw.center_lat_e7),
            etag: None,
        }
    }
}

impl From<&Header> for RawHeader {
    fn from(header: &Header) -> Self {
        Self {
            root_directory_offset: header.root_directory_offset,
            root_directory_length: header.root_directory_length,
            json_metadata_offset: header.json_metadata_offset,
            json_metadata_length: header.json_metadata_length,
            leaf_directory_offset: header.leaf_directory_offset,
            leaf_directory_length: header.leaf_directory_length,
            tile_data_offset: header.tile_data_offset,
            tile_data_length: header.tile_data_length,
            num_addressed_tiles: header.num_addressed_tiles,
            num_tile_entries: header.num_tile_entries,
            num_tile_contents: header.num_tile_contents,
            clustered: u8::from(header.clustered),
            internal_compression: header.internal_compression.as_byte(),
            tile_compression: header.tile_compression.as_byte(),
            tile_type: header.tile_type.as_byte(),
            min_zoom: header.min_zoom,
            max_zoom: header.max_zoom,
            min_lon_e7: to_e7(header.min_lon),
            min_lat_e7: to_e7(header.min_lat),
            max_lon_e7: to_e7(header.max_lon),
            max_lat_e7: to_e7(header.max_lat),
            center_zoom: header.center_zoom,
            center_lon_e7: to_e7(header.center_lon),
            center_lat_e7: to_e7(header.center_lat),
        }
    }
}

impl Header {
    /// Bounding box as `[min_lon, min_lat, max_lon, max_lat]`
    pub fn bounds(&self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }

    /// Suggested initial view as `(lon, lat, zoom)`
    pub fn center(&self) -> (f64, f64, u8) {
        (self.center_lon, self.center_lat, self.center_zoom)
    }

    /// Whether `z` is inside the archive's zoom range
    pub fn contains_zoom(&self, z: u8) -> bool {
        (self.min_zoom..=self.max_zoom).contains(&z)
    }
}

/// Decode a header from the start of `bytes`.
///
/// Extra trailing bytes (the rest of an initial range read) are ignored.
pub fn bytes_to_header(bytes: &[u8], etag: Option<String>) -> FormatResult<Header> {
    let magic_len = MAGIC.len().min(bytes.len());
    if bytes[..magic_len] != MAGIC[..magic_len] {
        return Err(FormatError::InvalidMagic(bytes[..magic_len].to_vec()));
    }
    if bytes.len() <= MAGIC.len() {
        return Err(FormatError::Truncated {
            what: "header",
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let version = bytes[MAGIC.len()];
    if version != SPEC_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    if bytes.len() < HEADER_SIZE {
        return Err(FormatError::Truncated {
            what: "header",
            needed: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let mut cursor = Cursor::new(&bytes[MAGIC.len() + 1..HEADER_SIZE]);
    let raw = RawHeader::read(&mut cursor)?;

    let mut header = Header::from(raw);
    header.etag = etag;
    Ok(header)
}
