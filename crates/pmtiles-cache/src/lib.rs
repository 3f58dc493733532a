//! Header, directory and byte-range caches for PMTiles archive readers
//!
//! A tile lookup touches the header, one to four directories and a tile byte
//! range. Everything except the tile bytes is worth keeping between lookups,
//! and this crate keeps it. Two strategies implement the same [`Cache`]
//! contract:
//!
//! - [`SharedPromiseCache`] stores a fetch as soon as it starts, so
//!   concurrent callers asking for the same key share one source read.
//! - [`ResolvedValueCache`] stores values only once they have resolved.
//!
//! Both hold at most [`CacheConfig::max_entries`] entries and prune the
//! least recently used ones in a batch when that limit is crossed. Entries
//! are keyed by source and by the header etag, and [`Cache::invalidate`]
//! drops every entry of a source once the archive is known to have changed.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pmtiles_cache::{Cache, CacheConfig, SharedPromiseCache};
//! use pmtiles_protocol::{FileSource, Source};
//!
//! # async fn run() -> Result<(), pmtiles_cache::CacheError> {
//! let cache = SharedPromiseCache::new(CacheConfig::default())?;
//! let source: Arc<dyn Source> = Arc::new(FileSource::new("world.pmtiles"));
//! let header = cache.get_header(&source, None, None).await?;
//! println!("zoom {}..={}", header.min_zoom, header.max_zoom);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
mod fetch;
pub mod key;
pub mod resolved;
pub mod shared;
pub mod stats;
pub mod traits;
pub mod value;

#[cfg(test)]
mod testing;

pub use config::CacheConfig;
pub use error::{CacheError, CacheResult};
pub use key::{CacheKey, KeyKind};
pub use resolved::ResolvedValueCache;
pub use shared::SharedPromiseCache;
pub use stats::CacheStats;
pub use traits::Cache;
pub use value::CacheValue;
