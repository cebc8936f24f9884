//! Job supervision: worker pool, failure arbitration, heartbeat, abort.
//!
//! [`DownloadContractor::start`] builds the job's transport from its
//! [`HttpConfig`](super::HttpConfig), preallocates the destination, partitions the
//! byte space, spawns one worker task per connection and a heartbeat task,
//! and waits for every worker to exit. The first fatal failure becomes the
//! job's result and aborts every other worker. A user abort through an
//! [`AbortHandle`] ends the job with [`JobOutcome::Aborted`] instead of an
//! error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::client::HttpClientFactory;
use super::constants::{BACKOFF_POLL_TICK, HEARTBEAT_EVERY_TICKS, HEARTBEAT_TICK, PROGRESS_SCALE};
use super::error::DownloadError;
use super::file_writer::SharedFileWriter;
use super::job::Job;
use super::retry::{RetryDecision, RetryPolicy};
use super::speed::SpeedMeter;
use super::task::{Range, TaskQueue};
use super::transport::TransportFactory;
use super::worker::{DownloadWorker, Supervisor, WorkerContext, WorkerExit, WorkerSnapshot, WorkerState};

/// Called with every heartbeat sample.
pub type HeartbeatCallback = Box<dyn FnMut(&Heartbeat) + Send + 'static>;

/// A span of the scaled progress map, `[start, end)` in `0..=PROGRESS_SCALE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Scaled start.
    pub start: u32,
    /// Scaled end.
    pub end: u32,
}

/// Aggregate progress delivered to the heartbeat callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    /// Bytes written so far, including partial ranges.
    pub bytes_done: u64,
    /// Resource size.
    pub bytes_total: u64,
    /// Smoothed transfer rate in bytes per second.
    pub speed: f64,
    /// Written regions scaled to `0..=PROGRESS_SCALE`, one per completed or
    /// in-flight range.
    pub spans: Vec<Span>,
    /// True for the sample sent after every worker has exited.
    pub is_final: bool,
}

/// How a job ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Every byte was written.
    Completed {
        /// Bytes written.
        bytes: u64,
    },
    /// The caller aborted; partial data stays on disk.
    Aborted {
        /// Bytes written before the abort.
        bytes_done: u64,
    },
}

/// Shared between the contractor, its workers and abort handles.
struct JobControl {
    policy: RetryPolicy,
    cancel: CancellationToken,
    user_aborted: AtomicBool,
    result: Mutex<Option<DownloadError>>,
    writer: Mutex<Option<Arc<SharedFileWriter>>>,
    queue: Mutex<Option<Arc<TaskQueue>>>,
}

impl JobControl {
    fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            cancel: CancellationToken::new(),
            user_aborted: AtomicBool::new(false),
            result: Mutex::new(None),
            writer: Mutex::new(None),
            queue: Mutex::new(None),
        }
    }

    fn abort_all(&self) {
        self.cancel.cancel();
        if let Some(queue) = lock(&self.queue).as_ref() {
            let dropped = queue.close();
            debug!(dropped, "outstanding ranges discarded");
        }
        if let Some(writer) = lock(&self.writer).as_ref() {
            writer.abort();
        }
    }
}

impl Supervisor for JobControl {
    fn ask_retry(&self, error: &DownloadError, failures: u32) -> RetryDecision {
        if self.cancel.is_cancelled() {
            return RetryDecision::DoNotRetry {
                reason: "download aborted".to_string(),
            };
        }
        self.policy.should_retry(error, failures)
    }

    fn report_fatal(&self, error: DownloadError) {
        {
            let mut result = lock(&self.result);
            if result.is_some() {
                debug!(error = %error, "later failure discarded");
                return;
            }
            warn!(error = %error, "job failed; aborting remaining workers");
            *result = Some(error);
        }
        self.abort_all();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Aborts a running (or not yet started) job from any thread.
#[derive(Clone)]
pub struct AbortHandle {
    control: Arc<JobControl>,
}

impl AbortHandle {
    /// Stops every worker promptly; `start` then returns [`JobOutcome::Aborted`].
    pub fn abort(&self) {
        if !self.control.user_aborted.swap(true, Ordering::SeqCst) {
            info!("abort requested");
        }
        self.control.abort_all();
    }

    /// Returns true once [`abort`](Self::abort) has been called.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.control.user_aborted.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortHandle")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Runs one download job across several connections.
pub struct DownloadContractor {
    factory: Arc<dyn TransportFactory>,
    control: Arc<JobControl>,
    started: AtomicBool,
    heartbeat_tick: Duration,
}

impl DownloadContractor {
    /// Creates a contractor that fetches through an [`HttpClient`](super::HttpClient)
    /// built from each job's connection settings.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_factory(Arc::new(HttpClientFactory), policy)
    }

    /// Creates a contractor whose transport comes from `factory`.
    #[must_use]
    pub fn with_factory(factory: Arc<dyn TransportFactory>, policy: RetryPolicy) -> Self {
        Self {
            factory,
            control: Arc::new(JobControl::new(policy)),
            started: AtomicBool::new(false),
            heartbeat_tick: HEARTBEAT_TICK,
        }
    }

    /// Overrides the heartbeat wake-up interval.
    #[must_use]
    pub fn with_heartbeat_tick(mut self, tick: Duration) -> Self {
        if !tick.is_zero() {
            self.heartbeat_tick = tick;
        }
        self
    }

    /// Returns a handle that aborts this contractor's job.
    #[must_use]
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            control: Arc::clone(&self.control),
        }
    }

    /// Downloads `job`, invoking `on_heartbeat` roughly every 0.8 s.
    ///
    /// # Errors
    ///
    /// Returns the first fatal worker failure, `DownloadError::Io` if the
    /// destination cannot be prepared, `DownloadError::InvalidInput` if this
    /// contractor already ran a job or the job's connection settings are
    /// rejected, or `DownloadError::Incomplete` if the workers exited without
    /// covering every byte.
    #[instrument(
        skip(self, job, on_heartbeat),
        fields(url = %job.url(), total = job.total_size(), connections = job.connections())
    )]
    pub async fn start(
        &self,
        job: &Job,
        on_heartbeat: HeartbeatCallback,
    ) -> Result<JobOutcome, DownloadError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DownloadError::invalid_input(
                "a contractor runs a single job; create a new one",
            ));
        }
        if self.control.user_aborted.load(Ordering::SeqCst) {
            return Ok(JobOutcome::Aborted { bytes_done: 0 });
        }

        let transport = self.factory.connect(job.http())?;
        debug!(proxy = ?job.http().proxy(), "transport ready");

        let total = job.total_size();
        let writer = Arc::new(SharedFileWriter::create(job.destination(), total).await?);
        let queue = Arc::new(TaskQueue::partitioned(total, job.granularity())?);
        info!(ranges = queue.len(), granularity = job.granularity(), "starting download");

        *lock(&self.control.writer) = Some(Arc::clone(&writer));
        *lock(&self.control.queue) = Some(Arc::clone(&queue));
        // An abort that raced the setup above found nothing to stop.
        if self.control.cancel.is_cancelled() {
            self.control.abort_all();
        }

        let states: Vec<Arc<WorkerState>> = (0..job.connections())
            .map(|_| Arc::new(WorkerState::new()))
            .collect();

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = tokio::spawn(run_heartbeat(
            states.clone(),
            total,
            on_heartbeat,
            heartbeat_stop.clone(),
            self.heartbeat_tick,
        ));

        let ctx = WorkerContext {
            url: job.url().to_string(),
            total_size: total,
            queue,
            writer: Arc::clone(&writer),
            transport,
            supervisor: Arc::clone(&self.control) as Arc<dyn Supervisor>,
            cancel: self.control.cancel.clone(),
            backoff_tick: BACKOFF_POLL_TICK,
        };
        let handles: Vec<JoinHandle<WorkerExit>> = states
            .iter()
            .enumerate()
            .map(|(id, state)| {
                tokio::spawn(DownloadWorker::new(id, ctx.clone(), Arc::clone(state)).run())
            })
            .collect();
        drop(ctx);

        for (id, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(exit) => debug!(worker = id, ?exit, "worker exited"),
                Err(e) => {
                    warn!(worker = id, error = %e, "worker task panicked");
                    self.control
                        .report_fatal(DownloadError::internal(format!("worker {id} panicked: {e}")));
                }
            }
        }

        heartbeat_stop.cancel();
        if let Err(e) = heartbeat.await {
            warn!(error = %e, "heartbeat task panicked");
        }

        lock(&self.control.writer).take();
        lock(&self.control.queue).take();
        let flushed = writer.finish().await;

        let snapshots: Vec<WorkerSnapshot> = states.iter().map(|s| s.snapshot()).collect();
        let bytes_done: u64 = snapshots.iter().map(WorkerSnapshot::bytes_done).sum();

        if self.control.user_aborted.load(Ordering::SeqCst) {
            info!(bytes_done, "download aborted by user");
            return Ok(JobOutcome::Aborted { bytes_done });
        }
        if let Some(error) = lock(&self.control.result).take() {
            return Err(error);
        }
        flushed?;

        let covered = coverage(snapshots.iter().flat_map(|s| s.completed.iter().copied()));
        if covered != total {
            return Err(DownloadError::Incomplete {
                expected: total,
                actual: covered,
            });
        }

        info!(bytes = total, "download completed");
        Ok(JobOutcome::Completed { bytes: total })
    }
}

/// Bytes covered by `ranges`, counting overlaps once.
fn coverage(ranges: impl Iterator<Item = Range>) -> u64 {
    let mut ranges: Vec<Range> = ranges.collect();
    ranges.sort();

    let mut covered = 0u64;
    let mut reach = 0u64;
    for range in ranges {
        let begin = range.begin().max(reach);
        if range.end() > begin {
            covered += range.end() - begin;
        }
        reach = reach.max(range.end());
    }
    covered
}

async fn run_heartbeat(
    states: Vec<Arc<WorkerState>>,
    total: u64,
    mut on_heartbeat: HeartbeatCallback,
    stop: CancellationToken,
    tick: Duration,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut meter = SpeedMeter::default();
    let mut ticks = 0u32;

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            _ = interval.tick() => {}
        }
        ticks = ticks.wrapping_add(1);
        if ticks % HEARTBEAT_EVERY_TICKS != 0 {
            continue;
        }
        on_heartbeat(&sample(&states, total, &mut meter, false));
    }

    on_heartbeat(&sample(&states, total, &mut meter, true));
}

fn sample(states: &[Arc<WorkerState>], total: u64, meter: &mut SpeedMeter, is_final: bool) -> Heartbeat {
    let snapshots: Vec<WorkerSnapshot> = states.iter().map(|s| s.snapshot()).collect();
    let bytes_done = snapshots.iter().map(WorkerSnapshot::bytes_done).sum();
    let speed = meter.touch(bytes_done);

    let mut spans: Vec<Span> = snapshots
        .iter()
        .flat_map(|snapshot| {
            let completed = snapshot
                .completed
                .iter()
                .map(|range| (range.begin(), range.end()));
            let partial = snapshot
                .current
                .filter(|_| snapshot.cur_offset > 0)
                .map(|range| (range.begin(), range.begin() + snapshot.cur_offset));
            completed.chain(partial)
        })
        .map(|(begin, end)| Span {
            start: scale(begin, total),
            end: scale(end, total),
        })
        .collect();
    spans.sort_by_key(|span| (span.start, span.end));

    Heartbeat {
        bytes_done,
        bytes_total: total,
        speed,
        spans,
        is_final,
    }
}

/// Maps a byte offset into `0..=PROGRESS_SCALE`.
fn scale(offset: u64, total: u64) -> u32 {
    if total == 0 {
        return 0;
    }
    let scaled = u128::from(offset.min(total)) * u128::from(PROGRESS_SCALE) / u128::from(total);
    u32::try_from(scaled).unwrap_or(PROGRESS_SCALE)
}
