//! Tile id to entry resolution through root and leaf directories

use std::sync::Arc;

use pmtiles_cache::Cache;
use pmtiles_formats::{Entry, FormatError, Header, find_tile};
use pmtiles_protocol::{CancellationToken, Source};
use tracing::trace;

use crate::error::{ReaderError, ReaderResult};

/// Find the entry holding `tile_id`, following leaf pointers
///
/// The returned entry's offset is absolute in the archive. Visits at most
/// `max_depth` directories, the root included.
pub async fn resolve_entry(
    cache: &dyn Cache,
    source: &Arc<dyn Source>,
    header: &Header,
    tile_id: u64,
    max_depth: u8,
    cancel: Option<&CancellationToken>,
) -> ReaderResult<Option<Entry>> {
    let mut offset = header.root_directory_offset;
    let mut length = header.root_directory_length;

    for depth in 0..max_depth {
        let directory = cache
            .get_directory(source, offset, length, header, cancel)
            .await?;
        let Some(entry) = find_tile(&directory, tile_id) else {
            trace!(tile_id, depth, "tile not in directory");
            return Ok(None);
        };

        if entry.is_leaf_pointer() {
            offset = absolute(header.leaf_directory_offset, entry, "leaf pointer")?;
            length = u64::from(entry.length);
            trace!(tile_id, depth, offset, length, "following leaf pointer");
            continue;
        }

        return Ok(Some(Entry {
            offset: absolute(header.tile_data_offset, entry, "tile")?,
            ..*entry
        }));
    }

    Err(ReaderError::DirectoryDepthExceeded { tile_id, max_depth })
}

/// Offset of `entry` within its archive section, made absolute
fn absolute(section: u64, entry: &Entry, what: &str) -> ReaderResult<u64> {
    section.checked_add(entry.offset).ok_or_else(|| {
        FormatError::InvalidDirectory(format!(
            "{what} offset {} of tile {} overflows the archive",
            entry.offset, entry.tile_id
        ))
        .into()
    })
}
