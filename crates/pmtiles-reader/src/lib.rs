//! Read tiles and metadata from PMTiles v3 archives
//!
//! PMTiles is a single-file archive of map tiles addressed by `z/x/y`. The
//! file is read through byte-range requests: a 127-byte header, a root
//! directory, possibly a few leaf directories, and finally the tile bytes.
//! [`Archive`] performs that walk and caches everything but the tile bytes.
//!
//! ```rust,no_run
//! use pmtiles_reader::Archive;
//!
//! # async fn run() -> Result<(), pmtiles_reader::ReaderError> {
//! let archive = Archive::open("https://example.com/world.pmtiles")?;
//! if let Some(tile) = archive.get_zxy(3, 4, 2, None).await? {
//!     let bytes = archive.decompress_tile(tile.data).await?;
//!     println!("{} bytes", bytes.len());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! If the archive is replaced while a reader is using it, the first request
//! that sees the new etag drops the cached state and retries once against the
//! new file.

pub mod archive;
pub mod config;
pub mod error;
pub mod resolver;

pub use archive::Archive;
pub use config::{CacheStrategy, ReaderConfig};
pub use error::{ReaderError, ReaderResult};
pub use resolver::resolve_entry;

pub use pmtiles_cache::{Cache, CacheConfig, CacheStats, ResolvedValueCache, SharedPromiseCache};
pub use pmtiles_formats::{Compression, Entry, Header, TileType};
pub use pmtiles_protocol::{
    CancellationToken, FileSource, HttpConfig, HttpSource, MemorySource, RangeResponse, Source,
};
