//! Cache of in-flight fetches
//!
//! The first caller for a key spawns the fetch and stores its shared future
//! before awaiting anything, so concurrent callers for that key join the same
//! read. Each caller waits on its own cancellation token; cancelling only
//! abandons the wait, never the fetch other callers depend on.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use futures::future::{self, BoxFuture, FutureExt, Shared};
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

type SharedFetch = Shared<BoxFuture<'static, Result<CacheValue, Arc<CacheError>>>>;

struct Slot {
    fetch: SharedFetch,
    generation: u64,
    last_used: AtomicU64,
}

struct Inner {
    entries: DashMap<CacheKey, Slot>,
    counter: AtomicU64,
    generations: AtomicU64,
    config: CacheConfig,
    decompressor: Arc<dyn Decompress>,
    stats: StatsRecorder,
}

impl Inner {
    fn tick(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    fn slot(&self, fetch: SharedFetch) -> Slot {
        Slot {
            fetch,
            generation: self.generations.fetch_add(1, Ordering::Relaxed),
            last_used: AtomicU64::new(self.tick()),
        }
    }

    /// Store an already resolved value, such as a prefetched root directory
    fn insert_resolved(&self, key: CacheKey, value: CacheValue) {
        let fetch = future::ready(Ok(value)).boxed().shared();
        self.entries.insert(key, self.slot(fetch));
        self.prune();
    }

    /// Drop a resolved header slot whose etag is not `current_etag`
    fn drop_stale_header(&self, key: &CacheKey, current_etag: &str) -> bool {
        self.entries
            .remove_if(key, |_, slot| {
                matches!(slot.fetch.peek(), Some(Ok(value)) if value.is_stale_header(current_etag))
            })
            .is_some()
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

/// Memoizes fetches while they are still in flight
#[derive(Clone)]
pub struct SharedPromiseCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SharedPromiseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedPromiseCache")
            .field("entries", &self.inner.entries.len())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl SharedPromiseCache {
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
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                counter: AtomicU64::new(0),
                generations: AtomicU64::new(0),
                config,
                decompressor,
                stats: StatsRecorder::default(),
            }),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Join or start the header fetch for `source`
    async fn join_header(
        &self,
        source: &Arc<dyn Source>,
        current_etag: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> CacheResult<Arc<Header>> {
        let key = CacheKey::header(source.key());
        let source = Arc::clone(source);
        let current_etag = current_etag.map(str::to_string);

        let value = self
            .get_or_fetch(key.clone(), cancel, move |inner| {
                async move {
                    let fetched = fetch_header(
                        source.as_ref(),
                        inner.decompressor.as_ref(),
                        &inner.config,
                        current_etag.as_deref(),
                        None,
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
                        inner.insert_resolved(root_key, CacheValue::Directory(root));
                    }
                    Ok(CacheValue::Header(fetched.header))
                }
                .boxed()
            })
            .await?;
        value.into_header(&key)
    }

    /// Join the fetch for `key`, starting it with `start` when none exists
    async fn get_or_fetch<F>(
        &self,
        key: CacheKey,
        cancel: Option<&CancellationToken>,
        start: F,
    ) -> CacheResult<CacheValue>
    where
        F: FnOnce(Arc<Inner>) -> BoxFuture<'static, CacheResult<CacheValue>>,
    {
        let (fetch, generation, started) = match self.inner.entries.entry(key.clone()) {
            MapEntry::Occupied(occupied) => {
                let slot = occupied.get();
                slot.last_used.store(self.inner.tick(), Ordering::Relaxed);
                self.inner.stats.record_hit();
                trace!(key = %key, "cache hit");
                (slot.fetch.clone(), slot.generation, false)
            }
            MapEntry::Vacant(vacant) => {
                self.inner.stats.record_miss();
                let task = tokio::spawn(start(Arc::clone(&self.inner)));
                let fetch = async move {
                    match task.await {
                        Ok(result) => result.map_err(Arc::new),
                        Err(err) => Err(Arc::new(CacheError::TaskFailed(err.to_string()))),
                    }
                }
                .boxed()
                .shared();
                let slot = self.inner.slot(fetch.clone());
                let generation = slot.generation;
                vacant.insert(slot);
                (fetch, generation, true)
            }
        };
        if started {
            self.inner.prune();
        }

        let result = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return Err(CacheError::Cancelled),
                    result = fetch => result,
                }
            }
            None => fetch.await,
        };

        result.map_err(|err| {
            // Only drop the slot this fetch created; a retry may have replaced it
            let removed = self
                .inner
                .entries
                .remove_if(&key, |_, slot| slot.generation == generation)
                .is_some();
            if removed {
                debug!(key = %key, error = %err, "dropped failed fetch");
            }
            CacheError::from_shared(err)
        })
    }
}

#[async_trait]
impl Cache for SharedPromiseCache {
    async fn get_header(
        &self,
        source: &Arc<dyn Source>,
        current_etag: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> CacheResult<Arc<Header>> {
        let key = CacheKey::header(source.key());
        if let Some(etag) = current_etag
            && self.inner.drop_stale_header(&key, etag)
        {
            debug!(source = source.key(), etag, "dropped stale header");
        }

        let header = self.join_header(source, current_etag, cancel).await?;
        // A fetch started without an etag may resolve to the older archive
        if let Some(etag) = current_etag
            && header.etag.as_deref() != Some(etag)
            && self.inner.drop_stale_header(&key, etag)
        {
            debug!(source = source.key(), etag, "joined fetch returned stale header");
            return self.join_header(source, current_etag, cancel).await;
        }
        Ok(header)
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
        let source = Arc::clone(source);
        let header = header.clone();

        let value = self
            .get_or_fetch(key.clone(), cancel, move |inner| {
                async move {
                    let entries = fetch_directory(
                        source.as_ref(),
                        inner.decompressor.as_ref(),
                        offset,
                        length,
                        &header,
                        None,
                    )
                    .await?;
                    Ok(CacheValue::Directory(entries))
                }
                .boxed()
            })
            .await?;
        value.into_directory(&key)
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
        let source = Arc::clone(source);
        let header = header.clone();

        let value = self
            .get_or_fetch(key.clone(), cancel, move |_| {
                async move {
                    let bytes = fetch_bytes(source.as_ref(), offset, length, &header, None).await?;
                    Ok(CacheValue::Bytes(bytes))
                }
                .boxed()
            })
            .await?;
        value.into_bytes(&key)
    }

    async fn invalidate(
        &self,
        source: &Arc<dyn Source>,
        current_etag: Option<&str>,
    ) -> CacheResult<()> {
        let before = self.inner.entries.len();
        self.inner
            .entries
            .retain(|key, _| key.source != source.key());
        self.inner.stats.record_invalidation();
        debug!(
            source = source.key(),
            removed = before.saturating_sub(self.inner.entries.len()),
            "invalidated source"
        );

        if self.inner.config.prefetch
            && let Err(err) = self.get_header(source, current_etag, None).await
        {
            warn!(source = source.key(), error = %err, "header refetch after invalidation failed");
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.entries.len()
    }

    fn clear(&self) {
        self.inner.entries.clear();
        self.inner.stats.reset();
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot(self.inner.entries.len())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::testing::{CountingSource, two_level_fixture};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn cache(config: CacheConfig) -> SharedPromiseCache {
        SharedPromiseCache::new(config).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_read() {
        let (counting, source) = CountingSource::slow(two_level_fixture(), Duration::from_millis(50));
        let cache = cache(CacheConfig::default());

        let calls = (0..8).map(|_| cache.get_header(&source, None, None));
        let headers = futures::future::join_all(calls).await;

        assert_eq!(counting.calls(), 1);
        let first = headers[0].as_ref().unwrap();
        assert!(headers.iter().all(|h| Arc::ptr_eq(h.as_ref().unwrap(), first)));
        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 7);
    }

    #[tokio::test]
    async fn test_concurrent_directory_reads_share_one_fetch() {
        let (counting, source) = CountingSource::slow(two_level_fixture(), Duration::from_millis(50));
        let cache = cache(CacheConfig::default().with_prefetch(false));
        let header = cache.get_header(&source, None, None).await.unwrap();
        let before = counting.calls();

        let calls = (0..6).map(|_| {
            cache.get_directory(
                &source,
                header.root_directory_offset,
                header.root_directory_length,
                &header,
                None,
            )
        });
        let directories = futures::future::join_all(calls).await;

        assert_eq!(counting.calls(), before + 1);
        let first = directories[0].as_ref().unwrap();
        assert_eq!(first.len(), 3);
        assert!(directories.iter().all(|d| Arc::ptr_eq(d.as_ref().unwrap(), first)));
    }

    #[tokio::test]
    async fn test_differing_current_etag_refetches_header() {
        let (counting, source) = CountingSource::fixture(two_level_fixture(), Some("v1"));
        let cache = cache(CacheConfig::default());
        cache.get_header(&source, None, None).await.unwrap();

        counting.inner().replace(two_level_fixture(), Some("v2".to_string()));
        let header = cache.get_header(&source, Some("v2"), None).await.unwrap();
        assert_eq!(header.etag.as_deref(), Some("v2"));
        assert_eq!(counting.calls(), 2);

        cache.get_header(&source, Some("v2"), None).await.unwrap();
        let cached = cache.get_header(&source, None, None).await.unwrap();
        assert_eq!(cached.etag.as_deref(), Some("v2"));
        assert_eq!(counting.calls(), 2);
    }

    #[tokio::test]
    async fn test_prefetched_root_is_cached() {
        let (counting, source) = CountingSource::fixture(two_level_fixture(), Some("v1"));
        let cache = cache(CacheConfig::default());

        let header = cache.get_header(&source, None, None).await.unwrap();
        let root = cache
            .get_directory(
                &source,
                header.root_directory_offset,
                header.root_directory_length,
                &header,
                None,
            )
            .await
            .unwrap();
        assert_eq!(root.len(), 3);
        assert_eq!(counting.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_caller_does_not_poison_others() {
        let (counting, source) = CountingSource::slow(two_level_fixture(), Duration::from_millis(100));
        let cache = cache(CacheConfig::default());
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let (cancelled, completed) = tokio::join!(
            cache.get_header(&source, None, Some(&token)),
            cache.get_header(&source, None, None),
        );

        assert!(cancelled.unwrap_err().is_cancelled());
        assert!(completed.is_ok());
        assert_eq!(counting.calls(), 1);
        // The fetch finished and stayed cached
        cache.get_header(&source, None, None).await.unwrap();
        assert_eq!(counting.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_completes_after_all_callers_cancel() {
        let (counting, source) = CountingSource::slow(two_level_fixture(), Duration::from_millis(30));
        let cache = cache(CacheConfig::default());
        let token = CancellationToken::new();
        token.cancel();

        let err = cache.get_header(&source, None, Some(&token)).await.unwrap_err();
        assert!(err.is_cancelled());

        tokio::time::sleep(Duration::from_millis(80)).await;
        cache.get_header(&source, None, None).await.unwrap();
        assert_eq!(counting.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_shared_then_retried() {
        let (counting, source) = CountingSource::slow(b"not an archive".to_vec(), Duration::from_millis(20));
        let cache = cache(CacheConfig::default());

        let (a, b) = tokio::join!(
            cache.get_header(&source, None, None),
            cache.get_header(&source, None, None),
        );
        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(counting.calls(), 1);
        assert!(cache.is_empty());

        assert!(cache.get_header(&source, None, None).await.is_err());
        assert_eq!(counting.calls(), 2);
    }

    #[tokio::test]
    async fn test_etag_mismatch_surfaces_through_share() {
        let (counting, source) = CountingSource::fixture(two_level_fixture(), Some("v1"));
        let cache = cache(CacheConfig::default().with_prefetch(false));
        let header = cache.get_header(&source, None, None).await.unwrap();

        counting.inner().replace(two_level_fixture(), Some("v2".to_string()));
        let err = cache
            .get_directory(
                &source,
                header.root_directory_offset,
                header.root_directory_length,
                &header,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.etag_mismatch(), Some((Some("v1"), Some("v2"))));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_and_refetch() {
        let (counting, source) = CountingSource::fixture(two_level_fixture(), Some("v1"));
        let cache = cache(CacheConfig::default());
        cache.get_header(&source, None, None).await.unwrap();
        assert_eq!(cache.len(), 2);

        counting.inner().replace(two_level_fixture(), Some("v2".to_string()));
        cache.invalidate(&source, Some("v2")).await.unwrap();

        let header = cache.get_header(&source, None, None).await.unwrap();
        assert_eq!(header.etag.as_deref(), Some("v2"));
        assert_eq!(counting.calls(), 2);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_prune_counts_pending_and_resolved() {
        let (_, source) = CountingSource::fixture(two_level_fixture(), None);
        let cache = cache(CacheConfig::default().with_max_entries(10).with_prefetch(false));
        let header = cache.get_header(&source, None, None).await.unwrap();

        for offset in 0..20 {
            cache.get_array_buffer(&source, offset, 1, &header, None).await.unwrap();
        }
        assert!(cache.len() <= 10);
        assert!(cache.stats().evictions >= 11);
        assert!(
            cache
                .inner
                .entries
                .get(&CacheKey::bytes(source.key(), None, 19, 1))
                .is_some()
        );
    }
}
