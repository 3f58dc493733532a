//! Byte-range sources for PMTiles archives
//!
//! A reader never loads a whole archive. It asks a [`Source`] for byte ranges
//! and checks the returned etag to notice when the archive changed underneath
//! it. Three sources are provided:
//!
//! - [`MemorySource`]: an archive held in memory, replaceable at runtime
//! - [`FileSource`]: a local file read with `tokio::fs`
//! - [`HttpSource`]: HTTP(S) `Range` requests through `reqwest`
//!
//! Every read accepts an optional [`CancellationToken`].
//!
//! ```rust,no_run
//! use pmtiles_protocol::{HttpSource, Source};
//!
//! # async fn run() -> Result<(), pmtiles_protocol::SourceError> {
//! let source = HttpSource::new("https://example.com/world.pmtiles")?;
//! let head = source.get_bytes(0, 127, None).await?;
//! println!("{} bytes, etag {:?}", head.data.len(), head.etag);
//! # Ok(())
//! # }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod file;
pub mod http;
pub mod source;
pub mod tls;

pub use cancel::{CancellationToken, with_cancel};
pub use config::HttpConfig;
pub use error::{SourceError, SourceResult};
pub use file::FileSource;
pub use http::HttpSource;
pub use source::{MemorySource, RangeResponse, Source};
pub use tls::ensure_crypto_provider;
