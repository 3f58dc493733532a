//! Sources and fixtures for cache tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use pmtiles_formats::test_utils::FixtureBuilder;
use pmtiles_protocol::{CancellationToken, MemorySource, RangeResponse, Source, SourceResult};

/// Memory source that counts reads and can delay them
#[derive(Debug)]
pub(crate) struct CountingSource {
    inner: MemorySource,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingSource {
    pub(crate) fn named(
        key: &str,
        data: Vec<u8>,
        etag: Option<&str>,
    ) -> (Arc<Self>, Arc<dyn Source>) {
        let mut inner = MemorySource::new(key, data);
        if let Some(etag) = etag {
            inner = inner.with_etag(etag);
        }
        Self::wrap(inner, None)
    }

    pub(crate) fn fixture(data: Vec<u8>, etag: Option<&str>) -> (Arc<Self>, Arc<dyn Source>) {
        Self::named("fixture.pmtiles", data, etag)
    }

    pub(crate) fn slow(data: Vec<u8>, delay: Duration) -> (Arc<Self>, Arc<dyn Source>) {
        Self::wrap(MemorySource::new("slow.pmtiles", data), Some(delay))
    }

    fn wrap(inner: MemorySource, delay: Option<Duration>) -> (Arc<Self>, Arc<dyn Source>) {
        let counting = Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
            delay,
        });
        let source: Arc<dyn Source> = counting.clone();
        (counting, source)
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn inner(&self) -> &MemorySource {
        &self.inner
    }
}

#[async_trait]
impl Source for CountingSource {
    async fn get_bytes(
        &self,
        offset: u64,
        length: u64,
        cancel: Option<&CancellationToken>,
    ) -> SourceResult<RangeResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get_bytes(offset, length, cancel).await
    }

    fn key(&self) -> &str {
        self.inner.key()
    }
}

/// Ten tiles (ids 0..=9) behind three leaf directories
pub(crate) fn two_level_fixture() -> Vec<u8> {
    (0..10_u64)
        .fold(FixtureBuilder::new().leaf_size(4), |builder, id| {
            builder.tile(id, 1, format!("tile-{id}").into_bytes())
        })
        .build()
        .bytes
}
