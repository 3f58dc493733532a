//! HTTP range-request source

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{
    CACHE_CONTROL, ETAG, EXPIRES, HeaderMap, HeaderName, HeaderValue, RANGE,
};
use tracing::{debug, trace};
use url::Url;

use crate::cancel::{CancellationToken, with_cancel};
use crate::config::HttpConfig;
use crate::error::{SourceError, SourceResult};
use crate::source::{RangeResponse, Source};
use crate::tls::ensure_crypto_provider;

/// Archive served over HTTP(S) with byte-range support
#[derive(Debug, Clone)]
pub struct HttpSource {
    url: String,
    client: reqwest::Client,
    headers: HeaderMap,
}

impl HttpSource {
    /// Create a source for `url` with default settings
    pub fn new(url: &str) -> SourceResult<Self> {
        Self::with_config(url, &HttpConfig::default())
    }

    /// Create a source for `url` using `config`
    pub fn with_config(url: &str, config: &HttpConfig) -> SourceResult<Self> {
        ensure_crypto_provider();
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|source| SourceError::HttpClientSetup { source })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let (name, value) = parse_header(name, value)?;
            headers.insert(name, value);
        }

        Ok(Self::with_client(url, client)?.with_headers(headers))
    }

    /// Create a source that shares an existing client
    pub fn with_client(url: &str, client: reqwest::Client) -> SourceResult<Self> {
        let parsed = Url::parse(url)?;
        Ok(Self {
            url: parsed.into(),
            client,
            headers: HeaderMap::new(),
        })
    }

    /// Send `headers` with every request, replacing same-named ones
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        for (name, value) in &headers {
            self.headers.insert(name.clone(), value.clone());
        }
        self
    }

    /// The archive URL
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch(&self, offset: u64, length: u64) -> SourceResult<RangeResponse> {
        if length == 0 {
            return Ok(RangeResponse::default());
        }
        let end = offset.saturating_add(length - 1);

        let response = self
            .client
            .get(&self.url)
            .headers(self.headers.clone())
            .header(RANGE, format!("bytes={offset}-{end}"))
            .send()
            .await
            .map_err(|source| SourceError::NetworkRequest { source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                status_code: status.as_u16(),
                url: self.url.clone(),
            });
        }

        // A 200 means the Range header was ignored; reject before reading a whole archive
        if status == StatusCode::OK
            && let Some(received) = response.content_length()
            && received > length
        {
            return Err(self.range_not_supported(length, received));
        }

        let etag = header_string(response.headers(), &ETAG).filter(|tag| !tag.starts_with("W/"));
        let expires = header_string(response.headers(), &EXPIRES);
        let cache_control = header_string(response.headers(), &CACHE_CONTROL);

        let data = response
            .bytes()
            .await
            .map_err(|source| SourceError::NetworkRequest { source })?;

        if status == StatusCode::OK && data.len() as u64 > length {
            return Err(self.range_not_supported(length, data.len() as u64));
        }

        trace!(url = %self.url, offset, length, status = status.as_u16(), "range request");
        Ok(RangeResponse {
            data,
            etag,
            expires,
            cache_control,
        })
    }

    fn range_not_supported(&self, requested: u64, received: u64) -> SourceError {
        debug!(url = %self.url, requested, received, "server ignored range header");
        SourceError::RangeNotSupported {
            url: self.url.clone(),
            requested,
            received,
        }
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn get_bytes(
        &self,
        offset: u64,
        length: u64,
        cancel: Option<&CancellationToken>,
    ) -> SourceResult<RangeResponse> {
        with_cancel(cancel, self.fetch(offset, length)).await
    }

    fn key(&self) -> &str {
        &self.url
    }
}

fn header_string(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn parse_header(name: &str, value: &str) -> SourceResult<(HeaderName, HeaderValue)> {
    let invalid = |reason: String| SourceError::InvalidHeader {
        name: name.to_string(),
        reason,
    };
    let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
    let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
    Ok((header_name, header_value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const BODY: &[u8] = b"0123456789abcdef";

    async fn archive_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tiles.pmtiles"))
            .and(header("range", "bytes=4-7"))
            .respond_with(
                ResponseTemplate::new(206)
                    .set_body_bytes(&BODY[4..8])
                    .insert_header("etag", "\"v1\"")
                    .insert_header("cache-control", "max-age=60"),
            )
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_range_request() {
        let server = archive_server().await;
        let source = HttpSource::new(&format!("{}/tiles.pmtiles", server.uri())).unwrap();

        let response = source.get_bytes(4, 4, None).await.unwrap();
        assert_eq!(&response.data[..], b"4567");
        assert_eq!(response.etag.as_deref(), Some("\"v1\""));
        assert_eq!(response.cache_control.as_deref(), Some("max-age=60"));
        assert!(response.expires.is_none());
    }

    #[tokio::test]
    async fn test_weak_etag_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(206)
                    .set_body_bytes(&BODY[..2])
                    .insert_header("etag", "W/\"weak\""),
            )
            .mount(&server)
            .await;

        let source = HttpSource::new(&server.uri()).unwrap();
        assert!(source.get_bytes(0, 2, None).await.unwrap().etag.is_none());
    }

    #[tokio::test]
    async fn test_full_body_on_200_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .mount(&server)
            .await;

        let source = HttpSource::new(&server.uri()).unwrap();
        let err = source.get_bytes(0, 4, None).await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::RangeNotSupported { requested: 4, received: 16, .. }
        ));
    }

    #[tokio::test]
    async fn test_small_archive_on_200_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(BODY))
            .mount(&server)
            .await;

        let source = HttpSource::new(&server.uri()).unwrap();
        let response = source.get_bytes(0, 16_384, None).await.unwrap();
        assert_eq!(&response.data[..], BODY);
    }

    #[tokio::test]
    async fn test_http_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = HttpSource::new(&format!("{}/missing.pmtiles", server.uri())).unwrap();
        let err = source.get_bytes(0, 4, None).await.unwrap_err();
        assert!(matches!(err, SourceError::HttpStatus { status_code: 404, .. }));
    }

    #[tokio::test]
    async fn test_custom_headers_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(&BODY[..1]))
            .expect(1)
            .mount(&server)
            .await;

        let config = HttpConfig::new().with_header("Authorization", "Bearer secret");
        let source = HttpSource::with_config(&server.uri(), &config).unwrap();
        assert_eq!(&source.get_bytes(0, 1, None).await.unwrap().data[..], b"0");
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(206)
                    .set_body_bytes(&BODY[..1])
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let source = HttpSource::new(&server.uri()).unwrap();
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let err = source.get_bytes(0, 1, Some(&token)).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(HttpSource::new("not a url"), Err(SourceError::InvalidUrl(_))));
    }

    #[test]
    fn test_invalid_header() {
        let config = HttpConfig::new().with_header("bad header", "x");
        assert!(matches!(
            HttpSource::with_config("http://localhost/a.pmtiles", &config),
            Err(SourceError::InvalidHeader { .. })
        ));
    }
}
