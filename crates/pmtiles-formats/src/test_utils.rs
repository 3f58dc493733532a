//! Fixture encoders for tests
//!
//! Builds small, valid archives in memory so readers can be tested without
//! checked-in binary files. Only enabled for tests and the `test-utils`
//! feature.

#![allow(clippy::expect_used)]

use std::io::Write;

use binrw::{BinWrite, io::Cursor};
use flate2::write::GzEncoder;

use crate::compression::{Compression, TileType};
use crate::directory::Entry;
use crate::header::{HEADER_SIZE, Header, MAGIC, RawHeader, SPEC_VERSION};
use crate::tile_id::tile_id_to_zxy;

/// Append `value` as an unsigned LEB128 varint
pub fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Columnar directory encoding (uncompressed)
pub fn encode_directory(entries: &[Entry]) -> Vec<u8> {
    let mut out = Vec::new();
    write_varint(&mut out, entries.len() as u64);

    let mut last_id = 0;
    for entry in entries {
        write_varint(&mut out, entry.tile_id - last_id);
        last_id = entry.tile_id;
    }
    for entry in entries {
        write_varint(&mut out, u64::from(entry.run_length));
    }
    for entry in entries {
        write_varint(&mut out, u64::from(entry.length));
    }
    for (i, entry) in entries.iter().enumerate() {
        let continues = i > 0 && {
            let prev = &entries[i - 1];
            entry.offset == prev.offset + u64::from(prev.length)
        };
        if continues {
            write_varint(&mut out, 0);
        } else {
            write_varint(&mut out, entry.offset + 1);
        }
    }
    out
}

/// Encode a header into its 127-byte form
pub fn encode_header(header: &Header) -> Vec<u8> {
    let mut out = Cursor::new(Vec::with_capacity(HEADER_SIZE));
    out.get_mut().extend_from_slice(&MAGIC);
    out.get_mut().push(SPEC_VERSION);
    out.set_position((MAGIC.len() + 1) as u64);
    #[allow(clippy::expect_used)]
    RawHeader::from(header)
        .write(&mut out)
        .expect("writing to a Vec cannot fail");
    out.into_inner()
}

/// gzip-compress `data`
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    #[allow(clippy::expect_used)]
    {
        encoder.write_all(data).expect("writing to a Vec cannot fail");
        encoder.finish().expect("writing to a Vec cannot fail")
    }
}

fn compress(data: &[u8], compression: Compression) -> Vec<u8> {
    match compression {
        Compression::Gzip => gzip(data),
        _ => data.to_vec(),
    }
}

/// A complete archive image plus the header it was written with
#[derive(Debug, Clone)]
pub struct ArchiveFixture {
    pub bytes: Vec<u8>,
    pub header: Header,
    /// Entries as addressed by tile id, offsets relative to the tile data
    pub entries: Vec<Entry>,
}

/// Assembles an archive: header, root directory, metadata, leaves, tile data
#[derive(Debug, Clone)]
pub struct FixtureBuilder {
    tiles: Vec<(u64, u32, Vec<u8>)>,
    metadata: String,
    internal_compression: Compression,
    tile_compression: Compression,
    tile_type: TileType,
    leaf_size: Option<usize>,
}

impl Default for FixtureBuilder {
    fn default() -> Self {
        Self {
            tiles: Vec::new(),
            metadata: "{}".to_string(),
            internal_compression: Compression::Gzip,
            tile_compression: Compression::None,
            tile_type: TileType::Mvt,
            leaf_size: None,
        }
    }
}

impl FixtureBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tile addressed by id; `run_length` consecutive ids share it
    pub fn tile(mut self, tile_id: u64, run_length: u32, data: impl Into<Vec<u8>>) -> Self {
        self.tiles.push((tile_id, run_length.max(1), data.into()));
        self
    }

    pub fn metadata(mut self, json: impl Into<String>) -> Self {
        self.metadata = json.into();
        self
    }

    pub fn internal_compression(mut self, compression: Compression) -> Self {
        self.internal_compression = compression;
        self
    }

    /// Only recorded in the header; payloads are stored as given
    pub fn tile_compression(mut self, compression: Compression) -> Self {
        self.tile_compression = compression;
        self
    }

    pub fn tile_type(mut self, tile_type: TileType) -> Self {
        self.tile_type = tile_type;
        self
    }

    /// Split entries into leaf directories of `size` entries each
    pub fn leaf_size(mut self, size: usize) -> Self {
        self.leaf_size = Some(size.max(1));
        self
    }

    pub fn build(mut self) -> ArchiveFixture {
        self.tiles.sort_by_key(|(id, _, _)| *id);

        let mut tile_data = Vec::new();
        let mut entries = Vec::with_capacity(self.tiles.len());
        for (tile_id, run_length, data) in &self.tiles {
            entries.push(Entry::new(
                *tile_id,
                tile_data.len() as u64,
                data.len() as u32,
                *run_length,
            ));
            tile_data.extend_from_slice(data);
        }

        let mut leaves = Vec::new();
        let root_entries = match self.leaf_size {
            Some(size) => entries
                .chunks(size)
                .map(|chunk| {
                    let blob = compress(&encode_directory(chunk), self.internal_compression);
                    let pointer = Entry::new(chunk[0].tile_id, leaves.len() as u64, blob.len() as u32, 0);
                    leaves.extend_from_slice(&blob);
                    pointer
                })
                .collect(),
            None => entries.clone(),
        };

        let root = compress(&encode_directory(&root_entries), self.internal_compression);
        let metadata = compress(self.metadata.as_bytes(), self.internal_compression);

        let zooms: Vec<u8> = entries
            .iter()
            .filter_map(|e| tile_id_to_zxy(e.tile_id).ok().map(|(z, _, _)| z))
            .collect();
        let addressed: u64 = entries.iter().map(|e| u64::from(e.run_length)).sum();

        let root_offset = HEADER_SIZE as u64;
        let metadata_offset = root_offset + root.len() as u64;
        let leaf_offset = metadata_offset + metadata.len() as u64;
        let tile_offset = leaf_offset + leaves.len() as u64;

        let header = Header {
            spec_version: SPEC_VERSION,
            root_directory_offset: root_offset,
            root_directory_length: root.len() as u64,
            json_metadata_offset: metadata_offset,
            json_metadata_length: metadata.len() as u64,
            leaf_directory_offset: leaf_offset,
            leaf_directory_length: leaves.len() as u64,
            tile_data_offset: tile_offset,
            tile_data_length: tile_data.len() as u64,
            num_addressed_tiles: addressed,
            num_tile_entries: entries.len() as u64,
            num_tile_contents: entries.len() as u64,
            clustered: true,
            internal_compression: self.internal_compression,
            tile_compression: self.tile_compression,
            tile_type: self.tile_type,
            min_zoom: zooms.iter().copied().min().unwrap_or(0),
            max_zoom: zooms.iter().copied().max().unwrap_or(0),
            min_lon: -180.0,
            min_lat: -85.0,
            max_lon: 180.0,
            max_lat: 85.0,
            center_zoom: 0,
            center_lon: 0.0,
            center_lat: 0.0,
            etag: None,
        };

        let mut bytes = encode_header(&header);
        bytes.extend_from_slice(&root);
        bytes.extend_from_slice(&metadata);
        bytes.extend_from_slice(&leaves);
        bytes.extend_from_slice(&tile_data);

        ArchiveFixture {
            bytes,
            header,
            entries,
        }
    }
}
