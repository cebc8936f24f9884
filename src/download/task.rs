//! Byte ranges and the shared task queue.
//!
//! A job's byte space `[0, total)` is cut into half-open [`Range`]s by
//! [`partition`]. Workers pull ranges from a [`TaskQueue`] until it runs dry;
//! each range is handed out exactly once.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use super::error::DownloadError;

/// Half-open byte interval `[begin, end)` with `begin < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Range {
    begin: u64,
    end: u64,
}

impl Range {
    /// Creates a range, or `None` if it would be empty.
    #[must_use]
    pub fn new(begin: u64, end: u64) -> Option<Self> {
        (begin < end).then_some(Self { begin, end })
    }

    /// First byte offset.
    #[must_use]
    pub fn begin(&self) -> u64 {
        self.begin
    }

    /// One past the last byte offset.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes in the range (never zero).
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.begin
    }

    /// Always false; kept for clippy's `len_without_is_empty`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Inclusive last byte offset, as used by HTTP `Range` headers.
    #[must_use]
    pub fn last(&self) -> u64 {
        self.end - 1
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.begin, self.end)
    }
}

/// Cuts `[0, total_size)` into consecutive ranges of `granularity` bytes.
///
/// The last range may be shorter. A zero-sized resource yields no ranges.
///
/// # Errors
///
/// Returns `DownloadError::InvalidInput` if `granularity` is zero.
pub fn partition(total_size: u64, granularity: u64) -> Result<Vec<Range>, DownloadError> {
    if granularity == 0 {
        return Err(DownloadError::invalid_input("granularity must be at least 1 byte"));
    }

    let mut ranges = Vec::with_capacity(usize::try_from(total_size.div_ceil(granularity)).unwrap_or(0));
    let mut begin = 0u64;
    while begin < total_size {
        let end = begin.saturating_add(granularity).min(total_size);
        ranges.extend(Range::new(begin, end));
        begin = end;
    }
    Ok(ranges)
}

/// FIFO of outstanding ranges shared by all workers of a job.
#[derive(Debug, Default)]
pub struct TaskQueue {
    ranges: Mutex<VecDeque<Range>>,
}

impl TaskQueue {
    /// Creates a queue holding `ranges` in order.
    #[must_use]
    pub fn new(ranges: impl IntoIterator<Item = Range>) -> Self {
        Self {
            ranges: Mutex::new(ranges.into_iter().collect()),
        }
    }

    /// Creates a queue from [`partition`].
    ///
    /// # Errors
    ///
    /// Returns `DownloadError::InvalidInput` if `granularity` is zero.
    pub fn partitioned(total_size: u64, granularity: u64) -> Result<Self, DownloadError> {
        partition(total_size, granularity).map(Self::new)
    }

    /// Removes and returns the next range, or `None` once drained.
    pub fn get(&self) -> Option<Range> {
        self.lock().pop_front()
    }

    /// Drops every outstanding range so idle workers stop pulling work.
    ///
    /// Returns how many ranges were discarded.
    pub fn close(&self) -> usize {
        let mut ranges = self.lock();
        let dropped = ranges.len();
        ranges.clear();
        dropped
    }

    /// Number of ranges not yet handed out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true once every range has been handed out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Range>> {
        self.ranges.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
