//! Job description: what to fetch, where to write it, and how to connect.

use std::path::{Path, PathBuf};
use std::time::Duration;

use url::Url;

use super::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CONNECTIONS, MAX_CONNECTIONS, MIN_CONNECTIONS,
    READ_TIMEOUT_SECS,
};
use super::error::DownloadError;

/// Connection settings applied to every request of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    proxy: Option<String>,
    headers: Vec<String>,
    connect_timeout: Duration,
    read_timeout: Duration,
    user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            headers: Vec::new(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    /// Routes every request through `proxy` (`host:port` or a full URL).
    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        let proxy = proxy.into();
        self.proxy = (!proxy.trim().is_empty()).then(|| proxy.trim().to_string());
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-read timeout.
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Overrides the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Adds a raw header line such as `Referer: https://example.com`.
    ///
    /// A bare name without a colon is stored as `Name:` (empty value).
    pub fn add_header(&mut self, line: impl Into<String>) {
        let line = line.into();
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if line.contains(':') {
            self.headers.push(line.to_string());
        } else {
            self.headers.push(format!("{line}:"));
        }
    }

    /// Builder form of [`add_header`](Self::add_header).
    #[must_use]
    pub fn with_header(mut self, line: impl Into<String>) -> Self {
        self.add_header(line);
        self
    }

    /// Returns true if a header named `name` was added (case-insensitive).
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.header_pairs()
            .any(|(header, _)| header.eq_ignore_ascii_case(name.trim()))
    }

    /// Iterates the added headers as trimmed `(name, value)` pairs.
    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim(), value.trim()))
        })
    }

    /// Configured proxy, if any.
    #[must_use]
    pub fn proxy(&self) -> Option<&str> {
        self.proxy.as_deref()
    }

    /// Connect timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Read timeout.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// `User-Agent` header value.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Rejects settings that would corrupt range requests.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::InvalidInput` if a `Range` header was added by
    /// hand.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.has_header("Range") {
            return Err(DownloadError::invalid_input(
                "a Range header cannot be set by hand; ranges are managed per connection",
            ));
        }
        Ok(())
    }
}

fn default_user_agent() -> String {
    format!("mcdl/{}", env!("CARGO_PKG_VERSION"))
}

/// A validated download job.
///
/// Build with [`Job::builder`].
#[derive(Debug, Clone)]
pub struct Job {
    url: String,
    destination: PathBuf,
    total_size: u64,
    granularity: u64,
    connections: usize,
    http: HttpConfig,
}

impl Job {
    /// Starts a builder for fetching `url` (of `total_size` bytes) into `destination`.
    pub fn builder(
        url: impl Into<String>,
        destination: impl Into<PathBuf>,
        total_size: u64,
    ) -> JobBuilder {
        JobBuilder {
            url: url.into(),
            destination: destination.into(),
            total_size,
            granularity: None,
            connections: DEFAULT_CONNECTIONS,
            http: HttpConfig::default(),
        }
    }

    /// Resource URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Destination file path.
    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Resource size in bytes.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes per range handed to workers.
    #[must_use]
    pub fn granularity(&self) -> u64 {
        self.granularity
    }

    /// Number of concurrent workers.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections
    }

    /// Connection settings the contractor builds its transport from.
    #[must_use]
    pub fn http(&self) -> &HttpConfig {
        &self.http
    }
}

/// Builder for [`Job`].
#[derive(Debug, Clone)]
pub struct JobBuilder {
    url: String,
    destination: PathBuf,
    total_size: u64,
    granularity: Option<u64>,
    connections: usize,
    http: HttpConfig,
}

impl JobBuilder {
    /// Number of concurrent workers (1..=50, default 4).
    #[must_use]
    pub fn connections(mut self, connections: usize) -> Self {
        self.connections = connections;
        self
    }

    /// Bytes per range. Defaults to an even split across connections.
    #[must_use]
    pub fn granularity(mut self, granularity: u64) -> Self {
        self.granularity = Some(granularity);
        self
    }

    /// Connection settings.
    #[must_use]
    pub fn http_config(mut self, http: HttpConfig) -> Self {
        self.http = http;
        self
    }

    /// Validates and builds the job.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::InvalidInput` if the URL is not http(s), the
    /// size is zero, the connection count is out of range, the granularity
    /// is zero, or a `Range` header was configured by hand.
    pub fn build(self) -> Result<Job, DownloadError> {
        let parsed = Url::parse(&self.url).map_err(|e| {
            DownloadError::invalid_input(format!("invalid URL '{}': {e}", self.url))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::invalid_input(format!(
                "unsupported URL scheme '{}' (expected http or https)",
                parsed.scheme()
            )));
        }
        if self.total_size == 0 {
            return Err(DownloadError::invalid_input("resource size must be greater than zero"));
        }
        if !(MIN_CONNECTIONS..=MAX_CONNECTIONS).contains(&self.connections) {
            return Err(DownloadError::invalid_input(format!(
                "connections must be between {MIN_CONNECTIONS} and {MAX_CONNECTIONS}, got {}",
                self.connections
            )));
        }
        self.http.validate()?;

        let granularity = match self.granularity {
            Some(0) => {
                return Err(DownloadError::invalid_input("granularity must be at least 1 byte"));
            }
            Some(g) => g,
            None => self.total_size.div_ceil(self.connections as u64),
        };

        Ok(Job {
            url: self.url,
            destination: self.destination,
            total_size: self.total_size,
            granularity,
            connections: self.connections,
            http: self.http,
        })
    }
}
