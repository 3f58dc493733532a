//! The cache contract used by archive readers
//!
//! Both strategies memoize three kinds of values per source: the header,
//! decoded directories and raw byte ranges. Keys are namespaced by
//! [`Source::key`], so one cache can serve many archives.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use pmtiles_formats::{Entry, Header};
use pmtiles_protocol::{CancellationToken, Source};

use crate::error::CacheResult;
use crate::stats::CacheStats;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Header of `source`, fetched on first use.
    ///
    /// `current_etag`, when given, must match the etag of a fresh read.
    async fn get_header(
        &self,
        source: &Arc<dyn Source>,
        current_etag: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> CacheResult<Arc<Header>>;

    /// Decoded directory stored at `offset..offset + length`.
    async fn get_directory(
        &self,
        source: &Arc<dyn Source>,
        offset: u64,
        length: u64,
        header: &Header,
        cancel: Option<&CancellationToken>,
    ) -> CacheResult<Arc<[Entry]>>;

    /// Raw bytes at `offset..offset + length`.
    async fn get_array_buffer(
        &self,
        source: &Arc<dyn Source>,
        offset: u64,
        length: u64,
        header: &Header,
        cancel: Option<&CancellationToken>,
    ) -> CacheResult<Bytes>;

    /// Drop every entry of `source`; refetches the header when prefetch is on.
    async fn invalidate(
        &self,
        source: &Arc<dyn Source>,
        current_etag: Option<&str>,
    ) -> CacheResult<()>;

    /// Entry count, including fetches still in flight.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self);

    fn stats(&self) -> CacheStats;
}
