//! The byte-range source contract and the in-memory source

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::cancel::{CancellationToken, with_cancel};
use crate::error::SourceResult;

/// Bytes returned by a range read plus the validators that came with them
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RangeResponse {
    /// The bytes read; shorter than requested when the range ran past the end
    pub data: Bytes,
    /// Strong validator identifying the archive version, if known
    pub etag: Option<String>,
    /// Raw `Expires` value, passed through untouched
    pub expires: Option<String>,
    /// Raw `Cache-Control` value, passed through untouched
    pub cache_control: Option<String>,
}

impl RangeResponse {
    /// Response carrying only data
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// Attach an etag
    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }
}

/// Anything that can serve byte ranges of one archive
///
/// Implementations must be safe to call from many tasks at once. A cancelled
/// read fails with [`SourceError::Cancelled`](crate::SourceError::Cancelled).
#[async_trait]
pub trait Source: Send + Sync {
    /// Read `length` bytes starting at `offset`
    async fn get_bytes(
        &self,
        offset: u64,
        length: u64,
        cancel: Option<&CancellationToken>,
    ) -> SourceResult<RangeResponse>;

    /// Stable identity of the archive, used to namespace cache entries
    fn key(&self) -> &str;
}

#[derive(Debug)]
struct MemoryBody {
    data: Bytes,
    etag: Option<String>,
}

/// Archive held in memory
///
/// The body and etag can be swapped at runtime, which behaves like an archive
/// replaced behind a URL.
#[derive(Debug, Clone)]
pub struct MemorySource {
    key: String,
    body: Arc<RwLock<MemoryBody>>,
}

impl MemorySource {
    /// Create a source named `key` holding `data`
    pub fn new(key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            body: Arc::new(RwLock::new(MemoryBody {
                data: data.into(),
                etag: None,
            })),
        }
    }

    /// Report `etag` with every read
    pub fn with_etag(self, etag: impl Into<String>) -> Self {
        self.body.write().etag = Some(etag.into());
        self
    }

    /// Replace the archive contents and etag
    pub fn replace(&self, data: impl Into<Bytes>, etag: Option<String>) {
        let mut body = self.body.write();
        body.data = data.into();
        body.etag = etag;
    }

    /// Current archive length
    pub fn len(&self) -> usize {
        self.body.read().data.len()
    }

    /// Whether the archive is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn get_bytes(
        &self,
        offset: u64,
        length: u64,
        cancel: Option<&CancellationToken>,
    ) -> SourceResult<RangeResponse> {
        with_cancel(cancel, async {
            let body = self.body.read();
            let len = body.data.len() as u64;
            let start = offset.min(len);
            let end = offset.saturating_add(length).min(len);
            Ok(RangeResponse::new(body.data.slice(start as usize..end as usize))
                .with_etag(body.etag.clone()))
        })
        .await
    }

    fn key(&self) -> &str {
        &self.key
    }
}
