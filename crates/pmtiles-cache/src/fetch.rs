//! Source reads and decoding shared by both cache strategies

use std::sync::Arc;

use bytes::Bytes;
use pmtiles_formats::{Decompress, Entry, FormatError, Header, bytes_to_header, parse_directory};
use pmtiles_protocol::{CancellationToken, RangeResponse, Source};
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};

/// A decoded header plus the root directory when it came with the same read
#[derive(Debug)]
pub(crate) struct HeaderFetch {
    pub(crate) header: Arc<Header>,
    pub(crate) root: Option<Arc<[Entry]>>,
}

/// Read and decode the header, prefetching the root directory when it fits
pub(crate) async fn fetch_header(
    source: &dyn Source,
    decompressor: &dyn Decompress,
    config: &CacheConfig,
    current_etag: Option<&str>,
    cancel: Option<&CancellationToken>,
) -> CacheResult<HeaderFetch> {
    let response = source
        .get_bytes(0, config.header_fetch_size, cancel)
        .await?;

    if let Some(expected) = current_etag
        && response.etag.as_deref() != Some(expected)
    {
        return Err(CacheError::EtagMismatch {
            expected: Some(expected.to_string()),
            actual: response.etag,
        });
    }

    let header = bytes_to_header(&response.data, response.etag.clone())?;
    debug!(
        source = source.key(),
        etag = ?header.etag,
        root_length = header.root_directory_length,
        "fetched header"
    );

    let root_end = header
        .root_directory_offset
        .saturating_add(header.root_directory_length);
    let root = if config.prefetch && root_end <= response.data.len() as u64 {
        let start = header.root_directory_offset as usize;
        let blob = response.data.slice(start..root_end as usize);
        let entries = decode_directory(decompressor, blob, &header).await?;
        debug!(source = source.key(), entries = entries.len(), "prefetched root directory");
        Some(entries)
    } else {
        None
    };

    Ok(HeaderFetch {
        header: Arc::new(header),
        root,
    })
}

/// Read, decompress and decode a directory
pub(crate) async fn fetch_directory(
    source: &dyn Source,
    decompressor: &dyn Decompress,
    offset: u64,
    length: u64,
    header: &Header,
    cancel: Option<&CancellationToken>,
) -> CacheResult<Arc<[Entry]>> {
    let response = read_checked(source, offset, length, header, cancel).await?;
    let entries = decode_directory(decompressor, response.data, header).await?;
    debug!(source = source.key(), offset, length, entries = entries.len(), "fetched directory");
    Ok(entries)
}

/// Read raw bytes
pub(crate) async fn fetch_bytes(
    source: &dyn Source,
    offset: u64,
    length: u64,
    header: &Header,
    cancel: Option<&CancellationToken>,
) -> CacheResult<Bytes> {
    if length == 0 {
        return Ok(Bytes::new());
    }
    let response = read_checked(source, offset, length, header, cancel).await?;
    debug!(source = source.key(), offset, length, "fetched bytes");
    Ok(response.data)
}

/// Read a range and reject it when the archive changed since `header` was read
pub(crate) async fn read_checked(
    source: &dyn Source,
    offset: u64,
    length: u64,
    header: &Header,
    cancel: Option<&CancellationToken>,
) -> CacheResult<RangeResponse> {
    let response = source.get_bytes(offset, length, cancel).await?;
    check_etag(header, &response)?;
    Ok(response)
}

/// Fail with `EtagMismatch` when the header has an etag the response lacks
pub(crate) fn check_etag(header: &Header, response: &RangeResponse) -> CacheResult<()> {
    match &header.etag {
        Some(expected) if response.etag.as_ref() != Some(expected) => {
            Err(CacheError::EtagMismatch {
                expected: Some(expected.clone()),
                actual: response.etag.clone(),
            })
        }
        _ => Ok(()),
    }
}

async fn decode_directory(
    decompressor: &dyn Decompress,
    blob: Bytes,
    header: &Header,
) -> CacheResult<Arc<[Entry]>> {
    let data = decompressor
        .decompress(blob, header.internal_compression)
        .await?;
    let entries = parse_directory(&data)?;
    if entries.is_empty() {
        return Err(FormatError::InvalidDirectory("empty directory".to_string()).into());
    }
    Ok(entries.into())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pmtiles_formats::test_utils::FixtureBuilder;
    use pmtiles_formats::{Compression, DefaultDecompressor};
    use pmtiles_protocol::MemorySource;
    use pretty_assertions::assert_eq;

    fn fixture_source(etag: Option<&str>) -> (MemorySource, Vec<Entry>) {
        let fixture = FixtureBuilder::new()
            .tile(0, 1, b"z0".to_vec())
            .tile(1, 1, b"z1".to_vec())
            .build();
        let source = MemorySource::new("fixture", fixture.bytes);
        let source = match etag {
            Some(etag) => source.with_etag(etag),
            None => source,
        };
        (source, fixture.entries)
    }

    #[tokio::test]
    async fn test_header_with_prefetched_root() {
        let (source, entries) = fixture_source(Some("e1"));
        let fetched = fetch_header(&source, &DefaultDecompressor, &CacheConfig::default(), None, None)
            .await
            .unwrap();
        assert_eq!(fetched.header.etag.as_deref(), Some("e1"));
        assert_eq!(fetched.header.internal_compression, Compression::Gzip);
        assert_eq!(&*fetched.root.unwrap(), entries.as_slice());
    }

    #[tokio::test]
    async fn test_header_without_prefetch() {
        let (source, _) = fixture_source(None);
        let config = CacheConfig::default().with_prefetch(false);
        let fetched = fetch_header(&source, &DefaultDecompressor, &config, None, None)
            .await
            .unwrap();
        assert!(fetched.root.is_none());
    }

    #[tokio::test]
    async fn test_root_beyond_initial_read_not_prefetched() {
        let (source, _) = fixture_source(None);
        let config = CacheConfig::default().with_header_fetch_size(127);
        let fetched = fetch_header(&source, &DefaultDecompressor, &config, None, None)
            .await
            .unwrap();
        assert!(fetched.root.is_none());
    }

    #[tokio::test]
    async fn test_header_current_etag_mismatch() {
        let (source, _) = fixture_source(Some("e2"));
        let err = fetch_header(&source, &DefaultDecompressor, &CacheConfig::default(), Some("e1"), None)
            .await
            .unwrap_err();
        assert_eq!(err.etag_mismatch(), Some((Some("e1"), Some("e2"))));
    }

    #[tokio::test]
    async fn test_directory_etag_checked() {
        let (source, _) = fixture_source(Some("e1"));
        let fetched = fetch_header(&source, &DefaultDecompressor, &CacheConfig::default(), None, None)
            .await
            .unwrap();
        let header = fetched.header;

        source.replace(source.get_bytes(0, u64::MAX, None).await.unwrap().data, None);
        let err = fetch_directory(
            &source,
            &DefaultDecompressor,
            header.root_directory_offset,
            header.root_directory_length,
            &header,
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.etag_mismatch(), Some((Some("e1"), None)));
    }

    #[tokio::test]
    async fn test_header_without_etag_accepts_any_response() {
        let (source, _) = fixture_source(None);
        let fetched = fetch_header(&source, &DefaultDecompressor, &CacheConfig::default(), None, None)
            .await
            .unwrap();
        source.replace(source.get_bytes(0, u64::MAX, None).await.unwrap().data, Some("new".to_string()));
        let bytes = fetch_bytes(&source, 0, 7, &fetched.header, None).await.unwrap();
        assert_eq!(&bytes[..], b"PMTiles");
    }

    #[tokio::test]
    async fn test_empty_directory_rejected() {
        let (source, _) = fixture_source(None);
        let fetched = fetch_header(&source, &DefaultDecompressor, &CacheConfig::default(), None, None)
            .await
            .unwrap();
        let mut header = (*fetched.header).clone();
        header.internal_compression = Compression::None;

        // A single zero byte decodes as a directory with no entries
        let blob = Bytes::from_static(&[0]);
        let err = decode_directory(&DefaultDecompressor, blob, &header).await.unwrap_err();
        assert!(matches!(err, CacheError::Format(FormatError::InvalidDirectory(_))));
    }

    #[tokio::test]
    async fn test_zero_length_bytes_skip_source() {
        let (source, _) = fixture_source(Some("e1"));
        let fetched = fetch_header(&source, &DefaultDecompressor, &CacheConfig::default(), None, None)
            .await
            .unwrap();
        source.replace(Vec::new(), None);
        assert!(fetch_bytes(&source, 500, 0, &fetched.header, None).await.unwrap().is_empty());
    }
}
