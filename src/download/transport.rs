//! Transport contract between the engine and an HTTP client.
//!
//! Workers and the range probe only see [`HttpTransport`] and
//! [`HttpResponse`]. [`HttpClient`](super::HttpClient) implements them on top
//! of reqwest; tests plug in scripted fakes. A [`TransportFactory`] turns a
//! job's [`HttpConfig`] into the transport its workers share.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument};

use super::content_range::parse_content_range;
use super::error::{DownloadError, ProtocolViolation};
use super::filename::parse_content_disposition;
use super::job::HttpConfig;

/// A single GET with a `Range` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeRequest {
    url: String,
    first: u64,
    last: Option<u64>,
}

impl RangeRequest {
    /// Requests bytes `first..=last`.
    pub fn bounded(url: impl Into<String>, first: u64, last: u64) -> Self {
        Self {
            url: url.into(),
            first,
            last: Some(last),
        }
    }

    /// Requests everything from `first` to the end of the resource.
    pub fn open_ended(url: impl Into<String>, first: u64) -> Self {
        Self {
            url: url.into(),
            first,
            last: None,
        }
    }

    /// Target URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// First requested byte.
    #[must_use]
    pub fn first(&self) -> u64 {
        self.first
    }

    /// Last requested byte (inclusive), if bounded.
    #[must_use]
    pub fn last(&self) -> Option<u64> {
        self.last
    }

    /// Value for the `Range` request header.
    #[must_use]
    pub fn header_value(&self) -> String {
        match self.last {
            Some(last) => format!("bytes={}-{last}", self.first),
            None => format!("bytes={}-", self.first),
        }
    }
}

/// An open response whose body is read chunk by chunk.
#[async_trait]
pub trait HttpResponse: Send {
    /// HTTP status code.
    fn status(&self) -> u16;

    /// Value of a response header (case-insensitive), if present and textual.
    fn header(&self, name: &str) -> Option<String>;

    /// Declared body length, if known.
    fn content_length(&self) -> Option<u64>;

    /// Next body chunk; `Ok(None)` at end of body.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, DownloadError>;
}

/// Opens range requests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends `request` and returns once response headers have arrived.
    async fn open(&self, request: &RangeRequest) -> Result<Box<dyn HttpResponse>, DownloadError>;
}

/// Builds the transport for one job from its connection settings.
pub trait TransportFactory: Send + Sync {
    /// Returns a transport that applies `config` to every request.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::InvalidInput` if `config` cannot be applied.
    fn connect(&self, config: &HttpConfig) -> Result<Arc<dyn HttpTransport>, DownloadError>;
}

/// What the range probe learned about a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeInfo {
    /// Complete resource length in bytes.
    pub total_size: u64,
    /// File name suggested by `Content-Disposition`, if any.
    pub suggested_file_name: Option<String>,
}

/// Checks that `url` honors range requests and learns its size.
///
/// Sends `Range: bytes=0-` and requires `206 Partial Content`. The size is
/// taken from `Content-Range`, falling back to `Content-Length` when the
/// server reports an unknown total. The body is not read.
///
/// # Errors
///
/// Returns `DownloadError::RangeNotSupported` for any status other than 206,
/// `DownloadError::ProtocolViolation` if the size cannot be determined, or
/// the transport's error if the request fails.
#[instrument(skip(transport))]
pub async fn probe(transport: &dyn HttpTransport, url: &str) -> Result<ProbeInfo, DownloadError> {
    let request = RangeRequest::open_ended(url, 0);
    let response = transport.open(&request).await?;

    let status = response.status();
    if status != 206 {
        return Err(DownloadError::range_not_supported(url, status));
    }

    let total_size = match response.header("content-range") {
        Some(value) => {
            let Some(parsed) = parse_content_range(&value) else {
                return Err(DownloadError::protocol(
                    url,
                    ProtocolViolation::MalformedContentRange { value },
                ));
            };
            if parsed.first != 0 {
                return Err(DownloadError::protocol(
                    url,
                    ProtocolViolation::RangeMismatch {
                        expected_first: 0,
                        expected_last: parsed.total.map_or(parsed.last, |t| t - 1),
                        actual_first: parsed.first,
                        actual_last: parsed.last,
                    },
                ));
            }
            parsed.total.or(response.content_length())
        }
        None => None,
    };

    let Some(total_size) = total_size.filter(|size| *size > 0) else {
        return Err(DownloadError::protocol(url, ProtocolViolation::MissingContentRange));
    };

    let suggested_file_name = response
        .header("content-disposition")
        .as_deref()
        .and_then(parse_content_disposition);

    debug!(total_size, ?suggested_file_name, "range probe succeeded");
    Ok(ProbeInfo {
        total_size,
        suggested_file_name,
    })
}
