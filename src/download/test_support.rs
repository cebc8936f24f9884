//! Scripted in-memory transport for engine tests.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use super::error::{DownloadError, TransportErrorKind};
use super::job::HttpConfig;
use super::transport::{HttpResponse, HttpTransport, RangeRequest, TransportFactory};

/// How the transport answers one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    /// `open` fails with this kind.
    Fail(TransportErrorKind),
    /// Serves `bytes` of the body, then the stream fails with `kind`.
    FailAfter { bytes: u64, kind: TransportErrorKind },
    /// Answers with this status, no `Content-Range`, empty body.
    Status(u16),
    /// 206 without `Content-Range`.
    NoContentRange,
    /// 206 whose `Content-Range` starts at byte 0 regardless of the request.
    WrongRange,
    /// Serves `n` bytes, then the body never ends.
    StallAfter(u64),
    /// Serves `n` bytes, then a clean end of body.
    ShortBody(u64),
    /// Serves the requested bytes plus one extra.
    Overrun,
}

pub(crate) struct ScriptedTransport {
    body: Vec<u8>,
    scripts: Mutex<HashMap<u64, VecDeque<Behavior>>>,
    requests: Mutex<Vec<(RangeRequest, Instant)>>,
    active: Arc<AtomicUsize>,
    extra_headers: Vec<(String, String)>,
    unknown_total: bool,
    chunk_size: usize,
}

impl ScriptedTransport {
    pub(crate) fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            extra_headers: Vec::new(),
            unknown_total: false,
            chunk_size: 16,
        }
    }

    pub(crate) fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.push((name.to_string(), value.to_string()));
        self
    }

    pub(crate) fn with_unknown_total(mut self) -> Self {
        self.unknown_total = true;
        self
    }

    pub(crate) fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Queues behaviors for requests whose first byte is `first`.
    ///
    /// Once the script for an offset runs out, requests are served normally.
    pub(crate) fn script(&self, first: u64, behaviors: impl IntoIterator<Item = Behavior>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(first)
            .or_default()
            .extend(behaviors);
    }

    pub(crate) fn requests(&self) -> Vec<RangeRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(request, _)| request.clone())
            .collect()
    }

    /// Requests whose first byte is `first`, with the time each was opened.
    pub(crate) fn requests_from(&self, first: u64) -> Vec<Instant> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(request, _)| request.first() == first)
            .map(|(_, at)| *at)
            .collect()
    }

    /// Responses currently alive (opened and not yet dropped).
    pub(crate) fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn body(&self) -> &[u8] {
        &self.body
    }

    fn chunks(&self, data: &[u8]) -> VecDeque<Result<Bytes, DownloadError>> {
        data.chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect()
    }
}

/// Hands one scripted transport to every job and records the settings it
/// was asked to apply.
pub(crate) struct ScriptedFactory {
    transport: Arc<ScriptedTransport>,
    configs: Mutex<Vec<HttpConfig>>,
}

impl ScriptedFactory {
    pub(crate) fn new(transport: Arc<ScriptedTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            configs: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn configs(&self) -> Vec<HttpConfig> {
        self.configs.lock().unwrap().clone()
    }
}

impl TransportFactory for ScriptedFactory {
    fn connect(&self, config: &HttpConfig) -> Result<Arc<dyn HttpTransport>, DownloadError> {
        config.validate()?;
        self.configs.lock().unwrap().push(config.clone());
        Ok(Arc::clone(&self.transport) as Arc<dyn HttpTransport>)
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn open(&self, request: &RangeRequest) -> Result<Box<dyn HttpResponse>, DownloadError> {
        self.requests
            .lock()
            .unwrap()
            .push((request.clone(), Instant::now()));
        let behavior = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&request.first())
            .and_then(VecDeque::pop_front);

        let total = self.body.len() as u64;
        let first = request.first();
        let mut response = FakeResponse::new(Arc::clone(&self.active));
        response.headers.extend(self.extra_headers.iter().cloned());

        if first >= total {
            response.status = 416;
            return Ok(Box::new(response));
        }
        let last = request.last().unwrap_or(total - 1).min(total - 1);
        let served = &self.body[first as usize..=last as usize];
        let total_label = if self.unknown_total {
            "*".to_string()
        } else {
            total.to_string()
        };
        let content_range = format!("bytes {first}-{last}/{total_label}");

        match behavior {
            Some(Behavior::Fail(kind)) => {
                return Err(DownloadError::transport(
                    request.url(),
                    kind,
                    "scripted connect failure",
                ));
            }
            Some(Behavior::Status(status)) => {
                response.status = status;
                return Ok(Box::new(response));
            }
            Some(Behavior::NoContentRange) => {}
            Some(Behavior::WrongRange) => {
                let len = last - first;
                response.set("Content-Range", format!("bytes 0-{len}/{total_label}"));
            }
            _ => response.set("Content-Range", content_range),
        }
        response.content_length = Some(served.len() as u64);

        match behavior {
            Some(Behavior::FailAfter { bytes, kind }) => {
                response.chunks = self.chunks(&served[..(bytes as usize).min(served.len())]);
                response.chunks.push_back(Err(DownloadError::transport(
                    request.url(),
                    kind,
                    "scripted stream failure",
                )));
            }
            Some(Behavior::StallAfter(bytes)) => {
                response.chunks = self.chunks(&served[..(bytes as usize).min(served.len())]);
                response.stall_at_end = true;
            }
            Some(Behavior::ShortBody(bytes)) => {
                response.chunks = self.chunks(&served[..(bytes as usize).min(served.len())]);
            }
            Some(Behavior::Overrun) => {
                let mut data = served.to_vec();
                data.push(0xFF);
                response.chunks = self.chunks(&data);
            }
            _ => response.chunks = self.chunks(served),
        }
        Ok(Box::new(response))
    }
}

struct FakeResponse {
    status: u16,
    headers: Vec<(String, String)>,
    content_length: Option<u64>,
    chunks: VecDeque<Result<Bytes, DownloadError>>,
    stall_at_end: bool,
    active: Arc<AtomicUsize>,
}

impl FakeResponse {
    fn new(active: Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            status: 206,
            headers: Vec::new(),
            content_length: None,
            chunks: VecDeque::new(),
            stall_at_end: false,
            active,
        }
    }

    fn set(&mut self, name: &str, value: String) {
        self.headers.push((name.to_string(), value));
    }
}

impl Drop for FakeResponse {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpResponse for FakeResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }

    fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, DownloadError> {
        match self.chunks.pop_front() {
            Some(Ok(chunk)) => Ok(Some(chunk)),
            Some(Err(error)) => Err(error),
            None if self.stall_at_end => std::future::pending().await,
            None => Ok(None),
        }
    }
}
