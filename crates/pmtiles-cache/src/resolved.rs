//! Cache of resolved values
//!
//! Only completed fetches are stored. Concurrent misses on the same key each
//! read the source; the last one to finish wins the slot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use pmtiles_formats::{Decompress, DefaultDecompressor, Entry, Header};
use pmtiles_protocol::{CancellationToken, Source};
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::fetch::{fetch_bytes, fetch_directory, fetch_header};
use crate::key::CacheKey;
use crate::stats::{CacheStats, StatsRecorder};
use crate::traits::Cache;
use crate::value::CacheValue;

#[derive(Debug)]
struct Slot {
    value: CacheValue,
    last_used: AtomicU64,
}

/// Memoizes header, directory and byte-range values once they resolve
pub struct ResolvedValueCache {
    entries: DashMap<CacheKey, Slot>,
    counter: AtomicU64,
    config: CacheConfig,
    decompressor: Arc<dyn Decompress>,
    stats: StatsRecorder,
}

impl std::fmt::Debug for ResolvedValueCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedValueCache")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ResolvedValueCache {
    /// Create a cache that decompresses with [`DefaultDecompressor`]
    pub fn new(config: CacheConfig) -> CacheResult<Self> {
        Self::with_decompressor(config, Arc::new(DefaultDecompressor))
    }

    /// Create a cache with a caller-supplied decompressor
    pub fn with_decompressor(
        config: CacheConfig,
        decompressor: Arc<dyn Decompress>,
    ) -> CacheResult<Self> {
        config
            .validate()
            .map_err(CacheError::InvalidConfiguration)?;
        Ok(Self {
            entries: DashMap::new(),
            counter: AtomicU64::new(0),
            config,
            decompressor,
            stats: StatsRecorder::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    fn lookup(&self, key: &CacheKey) -> Option<CacheValue> {
        let slot = self.entries.get(key)?;
        slot.last_used.store(self.tick(), Ordering::Relaxed);
        self.stats.record_hit();
        trace!(key = %key, "cache hit");
        Some(slot.value.clone())
    }

    fn store(&self, key: CacheKey, value: CacheValue) {
        let slot = Slot {
            value,
            last_used: AtomicU64::new(self.tick()),
        };
        self.entries.insert(key, slot);
        self.prune();
    }

    /// Evict least recently used entries down to the prune target
    fn prune(&self) {
        if self.entries.len() <= self.config.max_entries {
            return;
        }

        let mut candidates: Vec<(CacheKey, u64)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_used.load(Ordering::Relaxed)))
            .collect();

        // Oldest first
        candidates.sort_by_key(|(_, last_used)| *last_used);

        let excess = candidates.len().saturating_sub(self.config.prune_target());
        let evicted = candidates
            .into_iter()
            .take(excess)
            .filter(|(key, _)| self.entries.remove(key).is_some())
            .count();

        self.stats.record_evictions(evicted);
        debug!(evicted, remaining = self.entries.len(), "pruned cache");
    }
}

#[async_trait]
impl Cache for ResolvedValueCache {
    async fn get_header(
        &self,
        source: &Arc<dyn Source>,
        current_etag: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> CacheResult<Arc<Header>> {
        let key = CacheKey::header(source.key());
        // A header cached under another etag is stale for this caller
        if let Some(etag) = current_etag
            && self
                .entries
                .remove_if(&key, |_, slot| slot.value.is_stale_header(etag))
                .is_some()
        {
            debug!(source = source.key(), etag, "dropped stale header");
        }
        if let Some(value) = self.lookup(&key) {
            return value.into_header(&key);
        }
        self.stats.record_miss();

        let fetched = fetch_header(
            source.as_ref(),
            self.decompressor.as_ref(),
            &self.config,
            current_etag,
            cancel,
        )
        .await?;

        if let Some(root) = fetched.root {
            let header = &fetched.header;
            let root_key = CacheKey::directory(
                source.key(),
                header.etag.as_deref(),
                header.root_directory_offset,
                header.root_directory_length,
            );
            self.store(root_key, CacheValue::Directory(root));
        }
        self.store(key, CacheValue::Header(Arc::clone(&fetched.header)));
        Ok(fetched.header)
    }

    async fn get_directory(
        &self,
        source: &Arc<dyn Source>,
        offset: u64,
        length: u64,
        header: &Header,
        cancel: Option<&CancellationToken>,
    ) -> CacheResult<Arc<[Entry]>> {
        let key = CacheKey::directory(source.key(), header.etag.as_deref(), offset, length);
        if let Some(value) = self.lookup(&key) {
            return value.into_directory(&key);
        }
        self.stats.record_miss();

        let entries = fetch_directory(
            source.as_ref(),
            self.decompressor.as_ref(),
            offset,
            length,
            header,
            cancel,
        )
        .await?;
        self.store(key, CacheValue::Directory(Arc::clone(&entries)));
        Ok(entries)
    }

    async fn get_array_buffer(
        &self,
        source: &Arc<dyn Source>,
        offset: u64,
        length: u64,
        header: &Header,
        cancel: Option<&CancellationToken>,
    ) -> CacheResult<Bytes> {
        let key = CacheKey::bytes(source.key(), header.etag.as_deref(), offset, length);
        if let Some(value) = self.lookup(&key) {
            return value.into_bytes(&key);
        }
        self.stats.record_miss();

        let bytes = fetch_bytes(source.as_ref(), offset, length, header, cancel).await?;
        self.store(key, CacheValue::Bytes(bytes.clone()));
        Ok(bytes)
    }

    async fn invalidate(
        &self,
        source: &Arc<dyn Source>,
        current_etag: Option<&str>,
    ) -> CacheResult<()> {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.source != source.key());
        self.stats.record_invalidation();
        debug!(
            source = source.key(),
            removed = before.saturating_sub(self.entries.len()),
            "invalidated source"
        );

        if self.config.prefetch
            && let Err(err) = self.get_header(source, current_etag, None).await
        {
            warn!(source = source.key(), error = %err, "header refetch after invalidation failed");
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&self) {
        self.entries.clear();
        self.stats.reset();
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.entries.len())
    }
}
