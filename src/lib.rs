//! mcdl core library
//!
//! Resumable multi-connection HTTP downloads: a resource that honors range
//! requests is fetched over several connections at once and written straight
//! into a preallocated destination file.
//!
//! # Architecture
//!
//! Everything lives in [`download`]:
//! - `task` - byte ranges, partitioning, the shared task queue
//! - `file_writer` - positioned writes into the shared destination
//! - `transport` / `client` - the HTTP contract and its reqwest implementation
//! - `worker` - per-connection fetch loop with retry and backoff
//! - `contractor` - worker pool, failure arbitration, heartbeat, abort

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;

// Re-export commonly used types
pub use download::{
    AbortHandle, DownloadContractor, DownloadError, ErrorKind, Heartbeat, HttpClient, HttpConfig,
    Job, JobOutcome, RetryPolicy, TransportErrorKind, TransportFactory, probe,
};
