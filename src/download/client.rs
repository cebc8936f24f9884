//! reqwest-backed [`HttpTransport`].
//!
//! [`HttpClientFactory`] builds one [`HttpClient`] per job from the job's
//! [`HttpConfig`]; every worker shares it, so connections are pooled across
//! ranges.

use std::error::Error as _;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RANGE};
use reqwest::{Client, Proxy};
use tracing::{debug, instrument};

use super::error::{DownloadError, TransportErrorKind};
use super::job::HttpConfig;
use super::transport::{HttpResponse, HttpTransport, RangeRequest, TransportFactory};

type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// HTTP client that issues range requests.
///
/// Gzip is never negotiated: ranges must address raw resource bytes.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Builds a client with the proxy, headers, timeouts and user agent of `config`.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::InvalidInput` if `config` fails
    /// [`HttpConfig::validate`], the proxy or a header line is malformed, or
    /// the underlying client cannot be built.
    #[instrument(level = "debug", skip_all, fields(proxy = ?config.proxy()))]
    pub fn new(config: &HttpConfig) -> Result<Self, DownloadError> {
        config.validate()?;
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .user_agent(config.user_agent())
            .default_headers(default_headers(config)?);

        if let Some(proxy) = config.proxy() {
            let proxy_url = if proxy.contains("://") {
                proxy.to_string()
            } else {
                format!("http://{proxy}")
            };
            let proxy = Proxy::all(&proxy_url).map_err(|e| {
                DownloadError::invalid_input(format!("invalid proxy '{proxy_url}': {e}"))
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| DownloadError::invalid_input(format!("cannot build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

/// Builds an [`HttpClient`] for each job.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpClientFactory;

impl TransportFactory for HttpClientFactory {
    fn connect(&self, config: &HttpConfig) -> Result<Arc<dyn HttpTransport>, DownloadError> {
        Ok(Arc::new(HttpClient::new(config)?))
    }
}

fn default_headers(config: &HttpConfig) -> Result<HeaderMap, DownloadError> {
    let mut headers = HeaderMap::new();
    for (name, value) in config.header_pairs() {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| DownloadError::invalid_input(format!("invalid header name '{name}'")))?;
        let header_value = HeaderValue::from_str(value).map_err(|_| {
            DownloadError::invalid_input(format!("invalid value for header '{name}'"))
        })?;
        headers.append(header_name, header_value);
    }
    Ok(headers)
}

#[async_trait]
impl HttpTransport for HttpClient {
    async fn open(&self, request: &RangeRequest) -> Result<Box<dyn HttpResponse>, DownloadError> {
        let url = request.url();
        debug!(url, range = %request.header_value(), "sending range request");

        let response = self
            .client
            .get(url)
            .header(RANGE, request.header_value())
            .send()
            .await
            .map_err(|e| transport_error(url, &e, false))?;

        Ok(Box::new(ReqwestResponse {
            url: url.to_string(),
            status: response.status().as_u16(),
            headers: response.headers().clone(),
            content_length: response.content_length(),
            body: Box::pin(response.bytes_stream()),
        }))
    }
}

struct ReqwestResponse {
    url: String,
    status: u16,
    headers: HeaderMap,
    content_length: Option<u64>,
    body: BodyStream,
}

#[async_trait]
impl HttpResponse for ReqwestResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, DownloadError> {
        match self.body.next().await {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(e)) => Err(transport_error(&self.url, &e, true)),
            None => Ok(None),
        }
    }
}

fn transport_error(url: &str, error: &reqwest::Error, reading_body: bool) -> DownloadError {
    DownloadError::transport(url, classify_reqwest_error(error, reading_body), error.to_string())
}

/// Maps a reqwest failure onto a [`TransportErrorKind`].
fn classify_reqwest_error(error: &reqwest::Error, reading_body: bool) -> TransportErrorKind {
    if error.is_timeout() {
        return TransportErrorKind::Timeout;
    }

    let io_kind = io_error_kind(error);
    if error.is_connect() {
        return match io_kind {
            Some(std::io::ErrorKind::ConnectionRefused) => TransportErrorKind::ConnectionRefused,
            Some(std::io::ErrorKind::TimedOut) => TransportErrorKind::Timeout,
            _ => TransportErrorKind::Connect,
        };
    }

    match io_kind {
        Some(std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted) => {
            TransportErrorKind::ConnectionReset
        }
        Some(std::io::ErrorKind::TimedOut) => TransportErrorKind::Timeout,
        _ if reading_body || error.is_body() || error.is_decode() => {
            TransportErrorKind::StreamBroken
        }
        _ => TransportErrorKind::Other,
    }
}

fn io_error_kind(error: &reqwest::Error) -> Option<std::io::ErrorKind> {
    let mut source = error.source();
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            return Some(io.kind());
        }
        source = current.source();
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_new_accepts_default_config() {
        assert!(HttpClient::new(&HttpConfig::default()).is_ok());
    }

    #[test]
    fn test_new_accepts_bare_host_port_proxy() {
        let config = HttpConfig::default().with_proxy("127.0.0.1:1080");
        assert!(HttpClient::new(&config).is_ok());
    }

    #[test]
    fn test_new_rejects_hand_set_range_header() {
        let config = HttpConfig::default().with_header("Range: bytes=0-99");
        let err = HttpClient::new(&config).unwrap_err();
        assert!(err.to_string().contains("Range header"), "unexpected error: {err}");
    }

    #[test]
    fn test_factory_reports_bad_config() {
        let config = HttpConfig::default().with_header("Bad Header: x");
        let Err(err) = HttpClientFactory.connect(&config) else {
            panic!("a malformed header must be rejected");
        };
        assert!(matches!(err, DownloadError::InvalidInput { .. }), "unexpected error: {err}");
        assert!(HttpClientFactory.connect(&HttpConfig::default()).is_ok());
    }

    #[test]
    fn test_default_headers_include_bare_name() {
        let config = HttpConfig::default()
            .with_header("X-Token: abc")
            .with_header("X-Empty");
        let headers = default_headers(&config).unwrap();
        assert_eq!(headers.get("x-token").unwrap(), "abc");
        assert_eq!(headers.get("x-empty").unwrap(), "");
    }

    #[test]
    fn test_default_headers_reject_invalid_name() {
        let config = HttpConfig::default().with_header("Bad Header: x");
        let err = default_headers(&config).unwrap_err();
        assert!(err.to_string().contains("invalid header name"));
    }

    #[tokio::test]
    async fn test_refused_connection_is_classified() {
        // Bind then drop a listener so the port is known to be closed.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = HttpClient::new(&HttpConfig::default()).unwrap();
        let request = RangeRequest::open_ended(format!("http://127.0.0.1:{port}/x"), 0);

        let Err(err) = client.open(&request).await else {
            panic!("request to a closed port must fail");
        };
        assert_eq!(err.transport_kind(), Some(TransportErrorKind::ConnectionRefused));
    }
}
