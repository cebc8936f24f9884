//! Download workers and their observable state.
//!
//! A [`DownloadWorker`] pulls ranges from the shared [`TaskQueue`] until it
//! runs dry. Each range is fetched through the transport and streamed into the
//! destination through a [`RangeWriter`]. A failed fetch is offered to the
//! [`Supervisor`]; if it grants a retry the worker backs off and asks only for
//! the missing tail of the range. A refused retry ends the worker.
//!
//! [`WorkerState`] is written only by its worker and read by the heartbeat.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::constants::BACKOFF_POLL_TICK;
use super::content_range::parse_content_range;
use super::error::{DownloadError, ProtocolViolation, TransportErrorKind};
use super::file_writer::{RangeWriter, ResponseSink, SharedFileWriter};
use super::retry::RetryDecision;
use super::task::{Range, TaskQueue};
use super::transport::{HttpResponse, HttpTransport, RangeRequest};

/// Arbitrates failures on behalf of the workers of one job.
pub trait Supervisor: Send + Sync {
    /// Decides whether to retry after the `failures`-th failure of a range.
    fn ask_retry(&self, error: &DownloadError, failures: u32) -> RetryDecision;

    /// Records a failure the worker cannot recover from.
    fn report_fatal(&self, error: DownloadError);
}

#[derive(Debug, Default)]
struct RangeBook {
    current: Option<Range>,
    completed: Vec<Range>,
}

/// Progress record of one worker.
#[derive(Debug, Default)]
pub struct WorkerState {
    book: Mutex<RangeBook>,
    cur_offset: AtomicU64,
    backoff: AtomicU32,
}

/// Point-in-time copy of a [`WorkerState`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSnapshot {
    /// Range being fetched, if any.
    pub current: Option<Range>,
    /// Bytes of `current` already on disk.
    pub cur_offset: u64,
    /// Ranges fully written, in completion order.
    pub completed: Vec<Range>,
    /// Consecutive failures of `current` (zero when not backing off).
    pub backoff_attempt: u32,
}

impl WorkerSnapshot {
    /// Completed bytes plus the partial progress of the current range.
    #[must_use]
    pub fn bytes_done(&self) -> u64 {
        self.completed_bytes() + self.current.map_or(0, |_| self.cur_offset)
    }

    /// Bytes in fully completed ranges only.
    #[must_use]
    pub fn completed_bytes(&self) -> u64 {
        self.completed.iter().map(Range::len).sum()
    }
}

impl WorkerState {
    /// Creates an idle state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a consistent copy for reporting.
    #[must_use]
    pub fn snapshot(&self) -> WorkerSnapshot {
        let book = self.lock();
        let cur_offset = book
            .current
            .map_or(0, |range| self.cur_offset.load(Ordering::Acquire).min(range.len()));
        WorkerSnapshot {
            current: book.current,
            cur_offset,
            completed: book.completed.clone(),
            backoff_attempt: self.backoff.load(Ordering::Acquire),
        }
    }

    pub(super) fn begin(&self, range: Range) {
        let mut book = self.lock();
        book.current = Some(range);
        self.cur_offset.store(0, Ordering::Release);
        self.backoff.store(0, Ordering::Release);
    }

    fn offset(&self) -> u64 {
        self.cur_offset.load(Ordering::Acquire)
    }

    pub(super) fn set_offset(&self, written: u64) {
        self.cur_offset.store(written, Ordering::Release);
    }

    fn set_backoff(&self, failures: u32) {
        self.backoff.store(failures, Ordering::Release);
    }

    fn complete(&self) {
        let mut book = self.lock();
        if let Some(range) = book.current.take() {
            book.completed.push(range);
        }
        self.cur_offset.store(0, Ordering::Release);
        self.backoff.store(0, Ordering::Release);
    }

    /// Drops the current range; its partial bytes stay on disk uncounted.
    fn abandon(&self) {
        let mut book = self.lock();
        book.current = None;
        self.cur_offset.store(0, Ordering::Release);
        self.backoff.store(0, Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, RangeBook> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The queue ran dry.
    Drained,
    /// The job was cancelled.
    Aborted,
    /// A fetch failed and the supervisor refused to retry it.
    Failed,
}

/// Everything a worker shares with the rest of its job.
#[derive(Clone)]
pub struct WorkerContext {
    /// Resource URL.
    pub url: String,
    /// Resource size; served `Content-Range` totals must match it.
    pub total_size: u64,
    /// Outstanding ranges.
    pub queue: Arc<TaskQueue>,
    /// Destination file.
    pub writer: Arc<SharedFileWriter>,
    /// HTTP transport.
    pub transport: Arc<dyn HttpTransport>,
    /// Failure arbiter.
    pub supervisor: Arc<dyn Supervisor>,
    /// Job-wide cancellation.
    pub cancel: CancellationToken,
    /// Granularity of the interruptible backoff countdown.
    pub backoff_tick: Duration,
}

/// One connection's worth of work.
pub struct DownloadWorker {
    id: usize,
    ctx: WorkerContext,
    state: Arc<WorkerState>,
}

impl DownloadWorker {
    /// Creates worker `id` reporting into `state`.
    #[must_use]
    pub fn new(id: usize, ctx: WorkerContext, state: Arc<WorkerState>) -> Self {
        Self { id, ctx, state }
    }

    /// Fetches ranges until the queue is empty, the job is cancelled, or a
    /// fetch fails for good.
    #[instrument(skip(self), fields(worker = self.id))]
    pub async fn run(self) -> WorkerExit {
        loop {
            if self.ctx.cancel.is_cancelled() {
                return WorkerExit::Aborted;
            }
            let Some(range) = self.ctx.queue.get() else {
                debug!("queue drained");
                return WorkerExit::Drained;
            };

            self.state.begin(range);
            match self.fetch_range(range).await {
                Ok(()) => {
                    self.state.complete();
                    debug!(begin = range.begin(), end = range.end(), "range completed");
                }
                Err(error) => {
                    self.state.abandon();
                    if self.ctx.cancel.is_cancelled() {
                        debug!(begin = range.begin(), end = range.end(), "range abandoned on abort");
                        return WorkerExit::Aborted;
                    }
                    warn!(begin = range.begin(), end = range.end(), error = %error, "range failed");
                    self.ctx.supervisor.report_fatal(error);
                    return WorkerExit::Failed;
                }
            }
        }
    }

    /// Fetches `range`, retrying from the first missing byte while the
    /// supervisor allows it.
    async fn fetch_range(&self, range: Range) -> Result<(), DownloadError> {
        let mut failures = 0u32;
        loop {
            let error = match self.fetch_once(range).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };
            if error.is_aborted() || self.ctx.cancel.is_cancelled() {
                return Err(DownloadError::Aborted);
            }

            failures = failures.saturating_add(1);
            match self.ctx.supervisor.ask_retry(&error, failures) {
                RetryDecision::Retry { delay, attempt } => {
                    info!(
                        begin = range.begin(),
                        end = range.end(),
                        written = self.state.offset(),
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %error,
                        "retrying range"
                    );
                    self.state.set_backoff(failures);
                    if !self.backoff(delay).await {
                        return Err(DownloadError::Aborted);
                    }
                    self.state.set_backoff(0);
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(reason = %reason, "retry refused");
                    return Err(error);
                }
            }
        }
    }

    /// One request for the part of `range` not yet on disk.
    async fn fetch_once(&self, range: Range) -> Result<(), DownloadError> {
        let written = self.state.offset();
        let request = RangeRequest::bounded(&self.ctx.url, range.begin() + written, range.last());

        let mut response = tokio::select! {
            biased;
            () = self.ctx.cancel.cancelled() => return Err(DownloadError::Aborted),
            opened = self.ctx.transport.open(&request) => opened?,
        };
        self.check_response(response.as_ref(), &request)?;

        let mut sink = RangeWriter::resume(Arc::clone(&self.ctx.writer), range.begin(), written);
        sink.set_expected_size(Some(range.len()));

        while let Some(remaining) = sink.remaining().filter(|&left| left > 0) {
            let chunk = tokio::select! {
                biased;
                () = self.ctx.cancel.cancelled() => return Err(DownloadError::Aborted),
                chunk = response.next_chunk() => chunk?,
            };
            let Some(chunk) = chunk else {
                return Err(DownloadError::transport(
                    &self.ctx.url,
                    TransportErrorKind::StreamBroken,
                    format!(
                        "body ended after {} of {} bytes",
                        sink.bytes_written(),
                        range.len()
                    ),
                ));
            };

            if chunk.len() as u64 > remaining {
                return Err(DownloadError::protocol(
                    &self.ctx.url,
                    ProtocolViolation::BodyOverrun {
                        expected: range.len() - written,
                    },
                ));
            }
            let done = sink.write(&chunk).await?;
            self.state.set_offset(done);
        }
        Ok(())
    }

    /// Requires `206` with a `Content-Range` naming exactly the requested bytes.
    fn check_response(
        &self,
        response: &dyn HttpResponse,
        request: &RangeRequest,
    ) -> Result<(), DownloadError> {
        let url = &self.ctx.url;
        let status = response.status();
        if status != 206 {
            return Err(DownloadError::protocol(
                url,
                ProtocolViolation::UnexpectedStatus { status },
            ));
        }

        let value = response
            .header("content-range")
            .ok_or_else(|| DownloadError::protocol(url, ProtocolViolation::MissingContentRange))?;
        let served = parse_content_range(&value).ok_or_else(|| {
            DownloadError::protocol(url, ProtocolViolation::MalformedContentRange { value })
        })?;

        let expected_last = request.last().unwrap_or(self.ctx.total_size - 1);
        if served.first != request.first() || served.last != expected_last {
            return Err(DownloadError::protocol(
                url,
                ProtocolViolation::RangeMismatch {
                    expected_first: request.first(),
                    expected_last,
                    actual_first: served.first,
                    actual_last: served.last,
                },
            ));
        }
        if let Some(total) = served.total
            && total != self.ctx.total_size
        {
            return Err(DownloadError::protocol(
                url,
                ProtocolViolation::SizeMismatch {
                    expected: self.ctx.total_size,
                    actual: total,
                },
            ));
        }
        Ok(())
    }

    /// Waits `delay` in ticks; returns false if cancelled first.
    async fn backoff(&self, delay: Duration) -> bool {
        let tick = if self.ctx.backoff_tick.is_zero() {
            BACKOFF_POLL_TICK
        } else {
            self.ctx.backoff_tick
        };
        let mut remaining = delay;
        while !remaining.is_zero() {
            let step = remaining.min(tick);
            tokio::select! {
                biased;
                () = self.ctx.cancel.cancelled() => return false,
                () = tokio::time::sleep(step) => {}
            }
            remaining = remaining.saturating_sub(step);
        }
        !self.ctx.cancel.is_cancelled()
    }
}
