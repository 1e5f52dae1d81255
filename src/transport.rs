//! Byte transport for resolved media
//!
//! [`Transport`] opens a stream of bytes for a URL, optionally starting at an
//! offset so interrupted downloads can be resumed. [`HttpTransport`] is the
//! reqwest-based implementation.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::header::{CONTENT_RANGE, HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::StatusCode;
use std::collections::BTreeMap;
use url::Url;

use crate::config::HttpConfig;
use crate::error::{Error, Result};

/// An open byte stream
pub struct ByteStream {
    /// Offset of the first byte of `stream` within the resource
    ///
    /// Zero when the server ignored a range request; callers must then
    /// discard what they already have.
    pub offset: u64,
    /// Full size of the resource when the server advertised it
    pub total_size: Option<u64>,
    /// Body chunks
    pub stream: BoxStream<'static, Result<Bytes>>,
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("offset", &self.offset)
            .field("total_size", &self.total_size)
            .finish_non_exhaustive()
    }
}

/// Trait for byte transports
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open `url` starting at byte `offset`
    ///
    /// Non-success statuses are reported as [`Error::Http`], connection
    /// failures as [`Error::Network`].
    async fn open(
        &self,
        url: &Url,
        headers: &BTreeMap<String, String>,
        offset: u64,
    ) -> Result<ByteStream>;
}

/// reqwest-backed transport
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client from HTTP configuration
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(
        &self,
        url: &Url,
        headers: &BTreeMap<String, String>,
        offset: u64,
    ) -> Result<ByteStream> {
        let mut request = self.client.get(url.clone()).headers(header_map(headers)?);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().await?;
        let status = response.status();
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        match status {
            StatusCode::PARTIAL_CONTENT if offset > 0 => {
                let total_size = content_range
                    .as_deref()
                    .and_then(parse_content_range_total)
                    .or_else(|| response.content_length().map(|len| offset + len));
                tracing::debug!(url = %url, offset, ?total_size, "Resuming download");
                Ok(ByteStream {
                    offset,
                    total_size,
                    stream: body_stream(response),
                })
            }
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                // Everything up to the end is already on disk
                let total_size = content_range.as_deref().and_then(parse_content_range_total);
                if total_size.is_some_and(|total| total != offset) {
                    return Err(Error::Http {
                        status: status.as_u16(),
                        url: url.to_string(),
                    });
                }
                Ok(ByteStream {
                    offset,
                    total_size: Some(offset),
                    stream: stream::empty().boxed(),
                })
            }
            status if status.is_success() => {
                if offset > 0 {
                    tracing::debug!(url = %url, offset, "Server ignored range request, restarting");
                }
                Ok(ByteStream {
                    offset: 0,
                    total_size: response.content_length(),
                    stream: body_stream(response),
                })
            }
            status => Err(Error::Http {
                status: status.as_u16(),
                url: url.to_string(),
            }),
        }
    }
}

fn body_stream(response: reqwest::Response) -> BoxStream<'static, Result<Bytes>> {
    response
        .bytes_stream()
        .map(|chunk| chunk.map_err(Error::from))
        .boxed()
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::InvalidInput(format!("invalid value for header {}: {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Total size from a `Content-Range` value (`bytes 0-99/1234` or `bytes */1234`)
fn parse_content_range_total(value: &str) -> Option<u64> {
    let (_, total) = value.trim().strip_prefix("bytes")?.rsplit_once('/')?;
    total.trim().parse().ok()
}
