//! The archive facade
//!
//! [`Archive`] ties a source, a cache and a decompressor together and answers
//! tile and metadata requests. When the archive changes between reads (the
//! etag no longer matches the cached header) a request invalidates the cache
//! for that source and retries once.

use std::sync::Arc;

use bytes::Bytes;
use pmtiles_cache::{Cache, CacheError, ResolvedValueCache, SharedPromiseCache};
use pmtiles_formats::{Decompress, DefaultDecompressor, Entry, Header, zxy_to_tile_id};
use pmtiles_protocol::{CancellationToken, FileSource, HttpSource, RangeResponse, Source};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::config::{CacheStrategy, ReaderConfig};
use crate::error::{ReaderError, ReaderResult};
use crate::resolver::resolve_entry;

/// Reader for one PMTiles archive
#[derive(Clone)]
pub struct Archive {
    source: Arc<dyn Source>,
    cache: Arc<dyn Cache>,
    decompressor: Arc<dyn Decompress>,
    config: ReaderConfig,
}

impl std::fmt::Debug for Archive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archive")
            .field("source", &self.source.key())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Archive {
    /// Reader over `source` with default settings
    pub fn new(source: Arc<dyn Source>) -> ReaderResult<Self> {
        Self::with_config(source, ReaderConfig::default())
    }

    /// Reader over `source`, building the cache `config` asks for
    pub fn with_config(source: Arc<dyn Source>, config: ReaderConfig) -> ReaderResult<Self> {
        config
            .validate()
            .map_err(ReaderError::InvalidConfiguration)?;

        let decompressor: Arc<dyn Decompress> = Arc::new(DefaultDecompressor);
        let cache: Arc<dyn Cache> = match config.strategy {
            CacheStrategy::SharedPromise => Arc::new(SharedPromiseCache::with_decompressor(
                config.cache.clone(),
                Arc::clone(&decompressor),
            )?),
            CacheStrategy::ResolvedValue => Arc::new(ResolvedValueCache::with_decompressor(
                config.cache.clone(),
                Arc::clone(&decompressor),
            )?),
        };
        Ok(Self::with_parts(source, cache, decompressor, config))
    }

    /// Reader from explicit parts; `cache` may be shared with other archives
    pub fn with_parts(
        source: Arc<dyn Source>,
        cache: Arc<dyn Cache>,
        decompressor: Arc<dyn Decompress>,
        config: ReaderConfig,
    ) -> Self {
        Self {
            source,
            cache,
            decompressor,
            config,
        }
    }

    /// Open a local path or an `http(s)://` URL with default settings
    pub fn open(location: &str) -> ReaderResult<Self> {
        Self::open_with_config(location, ReaderConfig::default())
    }

    /// Open a local path or an `http(s)://` URL
    pub fn open_with_config(location: &str, config: ReaderConfig) -> ReaderResult<Self> {
        let source: Arc<dyn Source> =
            if location.starts_with("http://") || location.starts_with("https://") {
                Arc::new(HttpSource::with_config(location, &config.http)?)
            } else {
                Arc::new(FileSource::new(location))
            };
        debug!(source = source.key(), strategy = %config.strategy, "opening archive");
        Self::with_config(source, config)
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.source
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    /// The archive header, read on first use
    pub async fn get_header(&self) -> ReaderResult<Arc<Header>> {
        Ok(self.cache.get_header(&self.source, None, None).await?)
    }

    /// Entry for tile `z/x/y` with its offset absolute in the archive
    ///
    /// Returns `None` when the zoom is outside the archive's range or no
    /// entry covers the tile.
    pub async fn resolve_tile(
        &self,
        z: u8,
        x: u32,
        y: u32,
        cancel: Option<&CancellationToken>,
    ) -> ReaderResult<Option<Entry>> {
        let tile_id = zxy_to_tile_id(z, x, y)?;
        let header = self.cache.get_header(&self.source, None, cancel).await?;
        if !header.contains_zoom(z) {
            return Ok(None);
        }
        resolve_entry(
            self.cache.as_ref(),
            &self.source,
            &header,
            tile_id,
            self.config.max_directory_depth,
            cancel,
        )
        .await
    }

    /// Stored bytes of tile `z/x/y`, without retry on etag change
    pub async fn get_zxy_attempt(
        &self,
        z: u8,
        x: u32,
        y: u32,
        cancel: Option<&CancellationToken>,
    ) -> ReaderResult<Option<RangeResponse>> {
        let Some(entry) = self.resolve_tile(z, x, y, cancel).await? else {
            return Ok(None);
        };
        let header = self.cache.get_header(&self.source, None, cancel).await?;

        let response = self
            .source
            .get_bytes(entry.offset, u64::from(entry.length), cancel)
            .await?;
        if let Some(expected) = &header.etag
            && response.etag.as_ref() != Some(expected)
        {
            return Err(CacheError::EtagMismatch {
                expected: Some(expected.clone()),
                actual: response.etag,
            }
            .into());
        }
        Ok(Some(response))
    }

    /// Stored bytes of tile `z/x/y`
    ///
    /// The bytes are returned as stored, compressed with the header's
    /// `tile_compression`; see [`Archive::decompress_tile`].
    pub async fn get_zxy(
        &self,
        z: u8,
        x: u32,
        y: u32,
        cancel: Option<&CancellationToken>,
    ) -> ReaderResult<Option<RangeResponse>> {
        match self.get_zxy_attempt(z, x, y, cancel).await {
            Err(err) if err.is_etag_mismatch() => {
                self.invalidate_after(&err).await?;
                self.get_zxy_attempt(z, x, y, cancel).await
            }
            other => other,
        }
    }

    /// Undo the header's `tile_compression`
    pub async fn decompress_tile(&self, data: Bytes) -> ReaderResult<Bytes> {
        let header = self.get_header().await?;
        Ok(self
            .decompressor
            .decompress(data, header.tile_compression)
            .await?)
    }

    /// Archive metadata, without retry on etag change
    ///
    /// An archive without a metadata section yields an empty object.
    pub async fn get_metadata_attempt(&self) -> ReaderResult<serde_json::Value> {
        let header = self.get_header().await?;
        let stored = self
            .cache
            .get_array_buffer(
                &self.source,
                header.json_metadata_offset,
                header.json_metadata_length,
                &header,
                None,
            )
            .await?;
        if stored.is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }

        let json = self
            .decompressor
            .decompress(stored, header.internal_compression)
            .await?;
        Ok(serde_json::from_slice(&json)?)
    }

    /// Archive metadata as JSON
    pub async fn get_metadata(&self) -> ReaderResult<serde_json::Value> {
        match self.get_metadata_attempt().await {
            Err(err) if err.is_etag_mismatch() => {
                self.invalidate_after(&err).await?;
                self.get_metadata_attempt().await
            }
            other => other,
        }
    }

    /// Archive metadata deserialized into `T`
    pub async fn get_metadata_as<T: DeserializeOwned>(&self) -> ReaderResult<T> {
        Ok(serde_json::from_value(self.get_metadata().await?)?)
    }

    async fn invalidate_after(&self, err: &ReaderError) -> ReaderResult<()> {
        let actual = err.etag_mismatch().and_then(|(_, actual)| actual);
        warn!(
            source = self.source.key(),
            etag = ?actual,
            "archive changed during read, retrying"
        );
        Ok(self.cache.invalidate(&self.source, actual).await?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pmtiles_formats::test_utils::{FixtureBuilder, gzip};
    use pmtiles_formats::{Compression, FormatError, TileType};
    use pmtiles_protocol::MemorySource;
    use pretty_assertions::assert_eq;

    fn single_tile_archive() -> Vec<u8> {
        FixtureBuilder::new()
            .tile(0, 1, b"world".to_vec())
            .metadata(r#"{"name":"single","vector_layers":[]}"#)
            .build()
            .bytes
    }

    fn archive(bytes: Vec<u8>, etag: Option<&str>) -> (MemorySource, Archive) {
        let mut memory = MemorySource::new("test.pmtiles", bytes);
        if let Some(etag) = etag {
            memory = memory.with_etag(etag);
        }
        let archive = Archive::new(Arc::new(memory.clone())).unwrap();
        (memory, archive)
    }

    #[tokio::test]
    async fn test_single_tile() {
        let (_, archive) = archive(single_tile_archive(), None);

        let tile = archive.get_zxy(0, 0, 0, None).await.unwrap().unwrap();
        assert_eq!(&tile.data[..], b"world");
        // Zoom 1 is outside the archive
        assert!(archive.get_zxy(1, 0, 0, None).await.unwrap().is_none());
        assert!(archive.resolve_tile(1, 1, 1, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_coordinate() {
        let (_, archive) = archive(single_tile_archive(), None);
        let err = archive.get_zxy(2, 4, 0, None).await.unwrap_err();
        assert!(matches!(
            err,
            ReaderError::Format(FormatError::InvalidTileCoordinate { z: 2, x: 4, y: 0 })
        ));
    }

    #[tokio::test]
    async fn test_header() {
        let (_, archive) = archive(single_tile_archive(), Some("e1"));
        let header = archive.get_header().await.unwrap();
        assert_eq!(header.tile_type, TileType::Mvt);
        assert_eq!(header.etag.as_deref(), Some("e1"));
        assert_eq!((header.min_zoom, header.max_zoom), (0, 0));
    }

    #[tokio::test]
    async fn test_metadata() {
        #[derive(serde::Deserialize)]
        struct Meta {
            name: String,
        }

        let (_, archive) = archive(single_tile_archive(), None);
        let value = archive.get_metadata().await.unwrap();
        assert_eq!(value["name"], "single");
        let meta: Meta = archive.get_metadata_as().await.unwrap();
        assert_eq!(meta.name, "single");
    }

    #[tokio::test]
    async fn test_malformed_metadata() {
        let bytes = FixtureBuilder::new()
            .tile(0, 1, b"t".to_vec())
            .metadata("{not json")
            .build()
            .bytes;
        let (_, archive) = archive(bytes, None);
        assert!(matches!(
            archive.get_metadata().await.unwrap_err(),
            ReaderError::MalformedMetadata(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_metadata_section() {
        let fixture = FixtureBuilder::new()
            .internal_compression(Compression::None)
            .tile(0, 1, b"t".to_vec())
            .metadata("")
            .build();
        assert_eq!(fixture.header.json_metadata_length, 0);
        let (_, archive) = archive(fixture.bytes, None);
        assert_eq!(archive.get_metadata().await.unwrap(), serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_decompress_tile() {
        let bytes = FixtureBuilder::new()
            .tile_compression(Compression::Gzip)
            .tile(0, 1, gzip(b"inflated"))
            .build()
            .bytes;
        let (_, archive) = archive(bytes, None);
        let stored = archive.get_zxy(0, 0, 0, None).await.unwrap().unwrap();
        assert_ne!(&stored.data[..], b"inflated");
        assert_eq!(&archive.decompress_tile(stored.data).await.unwrap()[..], b"inflated");
    }

    #[tokio::test]
    async fn test_etag_change_retries_once() {
        let (memory, archive) = archive(single_tile_archive(), Some("v1"));
        assert_eq!(&archive.get_zxy(0, 0, 0, None).await.unwrap().unwrap().data[..], b"world");

        let replacement = FixtureBuilder::new()
            .tile(0, 1, b"a newer world".to_vec())
            .build()
            .bytes;
        memory.replace(replacement, Some("v2".to_string()));

        let tile = archive.get_zxy(0, 0, 0, None).await.unwrap().unwrap();
        assert_eq!(&tile.data[..], b"a newer world");
        assert_eq!(tile.etag.as_deref(), Some("v2"));
        assert_eq!(archive.get_header().await.unwrap().etag.as_deref(), Some("v2"));
        assert_eq!(archive.cache().stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_metadata_etag_change_retries() {
        let (memory, archive) = archive(single_tile_archive(), Some("v1"));
        archive.get_header().await.unwrap();

        let replacement = FixtureBuilder::new()
            .tile(0, 1, b"t".to_vec())
            .metadata(r#"{"name":"second"}"#)
            .build()
            .bytes;
        memory.replace(replacement, Some("v2".to_string()));

        let value = archive.get_metadata().await.unwrap();
        assert_eq!(value["name"], "second");
    }

    #[tokio::test]
    async fn test_cancelled() {
        let (_, archive) = archive(single_tile_archive(), None);
        let token = CancellationToken::new();
        token.cancel();
        let err = archive.get_zxy(0, 0, 0, Some(&token)).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_invalid_config() {
        let source: Arc<dyn Source> = Arc::new(MemorySource::new("m", Vec::new()));
        let config = ReaderConfig::new().with_max_directory_depth(0);
        assert!(matches!(
            Archive::with_config(source, config),
            Err(ReaderError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_open_picks_source() {
        let archive = Archive::open("https://example.com/a.pmtiles").unwrap();
        assert_eq!(archive.source().key(), "https://example.com/a.pmtiles");
        let archive = Archive::open("/tmp/a.pmtiles").unwrap();
        assert_eq!(archive.source().key(), "/tmp/a.pmtiles");
    }
}
