//! Directory entries, columnar decoding, and tile lookup
//!
//! A decompressed directory is a varint entry count followed by four varint
//! columns: tile id deltas, run lengths, lengths, and offsets. An offset value
//! of zero on any entry but the first means "immediately after the previous
//! entry"; every other value is stored plus one.

use serde::Serialize;

use crate::error::{FormatError, FormatResult};
use crate::varint::read_varint;

/// One directory record
///
/// `run_length > 0`: addresses `run_length` consecutive tile ids starting at
/// `tile_id`, all served by the same bytes at `offset` (relative to the
/// tile-data region). `run_length == 0`: points at a leaf directory at
/// `offset` relative to the leaf-directory region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Entry {
    pub tile_id: u64,
    pub offset: u64,
    pub length: u32,
    pub run_length: u32,
}

impl Entry {
    pub fn new(tile_id: u64, offset: u64, length: u32, run_length: u32) -> Self {
        Self {
            tile_id,
            offset,
            length,
            run_length,
        }
    }

    /// True when the entry points at a leaf directory instead of tile data
    pub fn is_leaf_pointer(&self) -> bool {
        self.run_length == 0
    }
}

fn narrow(value: u64, column: &str, index: usize) -> FormatResult<u32> {
    u32::try_from(value).map_err(|_| {
        FormatError::InvalidDirectory(format!("{column} {value} of entry {index} exceeds 32 bits"))
    })
}

/// Decode a decompressed directory blob into its ordered entry list.
pub fn parse_directory(data: &[u8]) -> FormatResult<Vec<Entry>> {
    let mut pos = 0;
    let num_entries = read_varint(data, &mut pos)?;

    // Every entry needs at least four bytes, one per column
    let remaining = (data.len() - pos) as u64;
    if num_entries > remaining / 4 {
        return Err(FormatError::InvalidDirectory(format!(
            "{num_entries} entries declared but only {remaining} bytes follow"
        )));
    }
    let count = num_entries as usize;

    let mut entries = Vec::with_capacity(count);
    let mut last_id = 0u64;
    for i in 0..count {
        let delta = read_varint(data, &mut pos)?;
        if i > 0 && delta == 0 {
            return Err(FormatError::InvalidDirectory(format!(
                "tile id of entry {i} does not increase"
            )));
        }
        last_id = last_id.checked_add(delta).ok_or_else(|| {
            FormatError::InvalidDirectory(format!("tile id of entry {i} overflows"))
        })?;
        entries.push(Entry::new(last_id, 0, 0, 1));
    }

    for (i, entry) in entries.iter_mut().enumerate() {
        entry.run_length = narrow(read_varint(data, &mut pos)?, "run length", i)?;
    }

    for (i, entry) in entries.iter_mut().enumerate() {
        entry.length = narrow(read_varint(data, &mut pos)?, "length", i)?;
    }

    for i in 0..count {
        let value = read_varint(data, &mut pos)?;
        entries[i].offset = match (value, i) {
            (0, 0) => {
                return Err(FormatError::InvalidDirectory(
                    "first entry cannot continue a previous entry".to_string(),
                ));
            }
            (0, _) => {
                let prev = entries[i - 1];
                prev.offset.checked_add(u64::from(prev.length)).ok_or_else(|| {
                    FormatError::InvalidDirectory(format!("offset of entry {i} overflows"))
                })?
            }
            (stored, _) => stored - 1,
        };
    }

    tracing::trace!(entries = count, bytes = data.len(), "decoded directory");
    Ok(entries)
}

/// Find the entry owning `tile_id`.
///
/// Returns the greatest entry with `entry.tile_id <= tile_id` when it is a
/// leaf pointer, or when it is a run covering `tile_id`. Returns `None` when
/// no entry precedes `tile_id` or `tile_id` falls in a gap after a run.
pub fn find_tile(entries: &[Entry], tile_id: u64) -> Option<&Entry> {
    let idx = match entries.binary_search_by_key(&tile_id, |e| e.tile_id) {
        Ok(exact) => return entries.get(exact),
        Err(0) => return None,
        Err(insert_at) => insert_at - 1,
    };

    let candidate = &entries[idx];
    if candidate.is_leaf_pointer() || tile_id - candidate.tile_id < u64::from(candidate.run_length)
    {
        Some(candidate)
    } else {
        None
    }
}
