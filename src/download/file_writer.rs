//! Positioned writes into the shared destination file.
//!
//! One [`SharedFileWriter`] owns the destination handle for a job. Each
//! fetch gets its own [`RangeWriter`], which knows its base offset and keeps
//! a running count of bytes written so a retried fetch can continue where
//! the last attempt stopped.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::error::DownloadError;

/// Receiver of response body chunks.
#[async_trait]
pub trait ResponseSink: Send {
    /// Announces the expected body length, when known.
    fn set_expected_size(&mut self, size: Option<u64>);

    /// Consumes one chunk and returns the running total of bytes accepted.
    async fn write(&mut self, chunk: &[u8]) -> Result<u64, DownloadError>;
}

/// Destination file shared by every worker of a job.
///
/// Seek and write happen under one lock, so writes to disjoint offsets never
/// interleave within a call.
#[derive(Debug)]
pub struct SharedFileWriter {
    path: PathBuf,
    file: Mutex<File>,
    aborted: AtomicBool,
}

impl SharedFileWriter {
    /// Creates (or truncates) `path` and sizes it to `total_size` bytes.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Io` if the file cannot be created or sized.
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), total_size = total_size))]
    pub async fn create(path: &Path, total_size: u64) -> Result<Self, DownloadError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| DownloadError::io(path, e))?;
        file.set_len(total_size)
            .await
            .map_err(|e| DownloadError::io(path, e))?;

        debug!(total_size, "destination file preallocated");
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            aborted: AtomicBool::new(false),
        })
    }

    /// Writes `chunk` at absolute `offset`.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Aborted` once [`abort`](Self::abort) has been
    /// called, or `DownloadError::Io` if the seek or write fails.
    pub async fn write_at(&self, chunk: &[u8], offset: u64) -> Result<(), DownloadError> {
        if self.is_aborted() {
            return Err(DownloadError::Aborted);
        }

        let mut file = self.file.lock().await;
        // Re-check: abort may have landed while waiting for the lock.
        if self.is_aborted() {
            return Err(DownloadError::Aborted);
        }
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        file.write_all(chunk)
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        file.flush()
            .await
            .map_err(|e| DownloadError::io(&self.path, e))
    }

    /// Makes every subsequent write fail with `DownloadError::Aborted`.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    /// Returns true once [`abort`](Self::abort) has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Flushes buffered data and syncs the file to disk.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::Io` if the flush or sync fails.
    pub async fn finish(&self) -> Result<(), DownloadError> {
        let mut file = self.file.lock().await;
        file.flush()
            .await
            .map_err(|e| DownloadError::io(&self.path, e))?;
        file.sync_all()
            .await
            .map_err(|e| DownloadError::io(&self.path, e))
    }

    /// Destination path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Per-fetch adapter that writes consecutive chunks from a base offset.
#[derive(Debug)]
pub struct RangeWriter {
    shared: Arc<SharedFileWriter>,
    base: u64,
    written: u64,
    expected: Option<u64>,
}

impl RangeWriter {
    /// Writes from `base`, skipping the `written` bytes already on disk.
    #[must_use]
    pub fn resume(shared: Arc<SharedFileWriter>, base: u64, written: u64) -> Self {
        Self {
            shared,
            base,
            written,
            expected: None,
        }
    }

    /// Bytes written relative to `base`.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Bytes still missing from the announced size, if one was set.
    #[must_use]
    pub fn remaining(&self) -> Option<u64> {
        self.expected.map(|expected| expected.saturating_sub(self.written))
    }
}

#[async_trait]
impl ResponseSink for RangeWriter {
    fn set_expected_size(&mut self, size: Option<u64>) {
        self.expected = size;
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<u64, DownloadError> {
        self.shared.write_at(chunk, self.base + self.written).await?;
        self.written += chunk.len() as u64;
        Ok(self.written)
    }
}
