//! Parallel range download engine.
//!
//! A resource that honors HTTP range requests is split into byte ranges and
//! fetched over several connections at once, each range streamed straight to
//! its offset in a preallocated destination file.
//!
//! # Features
//!
//! - Range probe (`Range: bytes=0-` must answer `206`)
//! - Even partitioning into a shared task queue
//! - Per-range retry with exponential backoff, resuming from the first
//!   missing byte
//! - Fail fast: the first fatal error aborts every other connection
//! - Heartbeat with aggregate progress, speed and a scaled progress map
//! - Cooperative abort that interrupts in-flight reads and backoff waits
//!
//! # Example
//!
//! ```no_run
//! use mcdl_core::download::{
//!     DownloadContractor, Heartbeat, HttpClient, HttpConfig, Job, RetryPolicy, probe,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let url = "https://example.com/disk.iso";
//! let config = HttpConfig::default();
//! let client = HttpClient::new(&config)?;
//! let info = probe(&client, url).await?;
//!
//! let job = Job::builder(url, "disk.iso", info.total_size)
//!     .connections(8)
//!     .http_config(config)
//!     .build()?;
//! // Workers get their own client, built from the job's `HttpConfig`.
//! let contractor = DownloadContractor::new(RetryPolicy::default());
//! let outcome = contractor
//!     .start(&job, Box::new(|beat: &Heartbeat| println!("{}/{}", beat.bytes_done, beat.bytes_total)))
//!     .await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

mod client;
pub mod constants;
mod content_range;
mod contractor;
mod error;
mod file_writer;
mod filename;
mod job;
mod retry;
mod speed;
mod task;
mod transport;
mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{HttpClient, HttpClientFactory};
pub use content_range::{ContentRange, parse_content_range};
pub use contractor::{AbortHandle, DownloadContractor, Heartbeat, HeartbeatCallback, JobOutcome, Span};
pub use error::{DownloadError, ErrorKind, ProtocolViolation, TransportErrorKind};
pub use file_writer::{RangeWriter, ResponseSink, SharedFileWriter};
pub use filename::{
    DEFAULT_FILE_NAME, choose_file_name, parse_content_disposition, resolve_unique_path,
    sanitize_filename,
};
pub use job::{HttpConfig, Job, JobBuilder};
pub use retry::{DEFAULT_MAX_EXPONENT, DEFAULT_RETRYABLE, RetryDecision, RetryPolicy};
pub use speed::SpeedMeter;
pub use task::{Range, TaskQueue, partition};
pub use transport::{HttpResponse, HttpTransport, ProbeInfo, RangeRequest, TransportFactory, probe};
pub use worker::{DownloadWorker, Supervisor, WorkerContext, WorkerExit, WorkerSnapshot, WorkerState};
