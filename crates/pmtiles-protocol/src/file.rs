//! Local file source

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::trace;

use crate::cancel::{CancellationToken, with_cancel};
use crate::error::SourceResult;
use crate::source::{RangeResponse, Source};

/// Archive stored on the local filesystem
///
/// The file is opened per read so a replaced file is picked up. Its etag is
/// derived from the file length and modification time.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    key: String,
}

impl FileSource {
    /// Create a source for `path`; the file is not touched until first read
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let key = path.display().to_string();
        Self { path, key }
    }

    /// Path of the archive
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_range(&self, offset: u64, length: u64) -> SourceResult<RangeResponse> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        let metadata = file.metadata().await?;
        let size = metadata.len();

        let start = offset.min(size);
        let end = offset.saturating_add(length).min(size);
        let mut buf = BytesMut::zeroed((end - start) as usize);
        if !buf.is_empty() {
            file.seek(SeekFrom::Start(start)).await?;
            file.read_exact(&mut buf).await?;
        }

        let modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        let etag = format!("{size:x}-{modified:x}");

        trace!(path = %self.key, offset, length, read = buf.len(), "file range read");
        Ok(RangeResponse::new(buf.freeze()).with_etag(Some(etag)))
    }
}

#[async_trait]
impl Source for FileSource {
    async fn get_bytes(
        &self,
        offset: u64,
        length: u64,
        cancel: Option<&CancellationToken>,
    ) -> SourceResult<RangeResponse> {
        with_cancel(cancel, self.read_range(offset, length)).await
    }

    fn key(&self) -> &str {
        &self.key
    }
}
