//! Retry arbitration with exponential backoff for failed range fetches.
//!
//! Workers offer every failed fetch to the contractor, which consults a
//! [`RetryPolicy`]. Only transport errors whose [`TransportErrorKind`] is on
//! the policy's allow-list are retried; everything else is fatal for the job.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use mcdl_core::download::{DownloadError, RetryDecision, RetryPolicy, TransportErrorKind};
//!
//! let policy = RetryPolicy::default();
//! let error = DownloadError::transport("https://example.com/a", TransportErrorKind::Timeout, "timed out");
//!
//! match policy.should_retry(&error, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_secs(2));
//!         assert_eq!(attempt, 2);
//!     }
//!     RetryDecision::DoNotRetry { reason } => panic!("unexpected refusal: {reason}"),
//! }
//! ```
//!
//! How a failure is classified stays inside this module; callers act on the
//! [`RetryDecision`] alone.
//!
//! ```compile_fail
//! use mcdl_core::download::FailureType;
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, instrument};

use super::error::{DownloadError, TransportErrorKind};

/// Default backoff unit; the first retry waits two units.
const DEFAULT_BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Backoff exponent cap (wait tops out at 2^8 units).
pub const DEFAULT_MAX_EXPONENT: u32 = 8;

/// Transport failures retried by default.
pub const DEFAULT_RETRYABLE: [TransportErrorKind; 2] = [
    TransportErrorKind::Timeout,
    TransportErrorKind::ConnectionRefused,
];

/// Classification of a fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureType {
    /// Transport failure on the policy's allow-list.
    Transient,
    /// Anything else: protocol violations, local IO, unlisted transport kinds.
    Permanent,
    /// The job is being cancelled; not a failure.
    Aborted,
}

/// Decision on whether to retry a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then fetch the rest of the range again.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// The attempt number the retry will be (first retry is attempt 2).
        attempt: u32,
    },

    /// Give up; the failure becomes the job's result.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Retry policy shared by every worker of a job.
///
/// # Default Values
///
/// - `retryable`: timeout, connection-refused
/// - `max_retries`: unlimited
/// - `backoff_unit`: 1 second
/// - `max_exponent`: 8
///
/// # Delay Calculation
///
/// ```text
/// delay = backoff_unit * 2^min(failures, max_exponent)
/// ```
///
/// With defaults: 2s, 4s, 8s, ... capped at 256s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    retryable: BTreeSet<TransportErrorKind>,
    max_retries: Option<u32>,
    backoff_unit: Duration,
    max_exponent: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retryable: DEFAULT_RETRYABLE.into_iter().collect(),
            max_retries: None,
            backoff_unit: DEFAULT_BACKOFF_UNIT,
            max_exponent: DEFAULT_MAX_EXPONENT,
        }
    }
}

impl RetryPolicy {
    /// Replaces the allow-list of retryable transport failures.
    #[must_use]
    pub fn with_retryable(mut self, kinds: impl IntoIterator<Item = TransportErrorKind>) -> Self {
        self.retryable = kinds.into_iter().collect();
        self
    }

    /// Caps retries per range; `None` retries forever.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff unit.
    #[must_use]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    /// Retryable transport kinds.
    pub fn retryable(&self) -> impl Iterator<Item = TransportErrorKind> + '_ {
        self.retryable.iter().copied()
    }

    /// Retry cap per range, if any.
    #[must_use]
    pub fn max_retries(&self) -> Option<u32> {
        self.max_retries
    }

    /// Classifies `error` against the allow-list.
    #[must_use]
    fn classify(&self, error: &DownloadError) -> FailureType {
        match error {
            DownloadError::Aborted => FailureType::Aborted,
            DownloadError::Transport { kind, .. } if self.retryable.contains(kind) => {
                FailureType::Transient
            }
            _ => FailureType::Permanent,
        }
    }

    /// Decides whether to retry after the `failures`-th consecutive failure
    /// of one range (1-indexed).
    #[instrument(skip(self, error), fields(kind = %error.kind()))]
    pub fn should_retry(&self, error: &DownloadError, failures: u32) -> RetryDecision {
        match self.classify(error) {
            FailureType::Aborted => {
                return RetryDecision::DoNotRetry {
                    reason: "download aborted".to_string(),
                };
            }
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: format!("not retryable: {error}"),
                };
            }
            FailureType::Transient => {}
        }

        if let Some(max) = self.max_retries
            && failures > max
        {
            debug!(failures, max, "max retries reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max retries ({max}) exhausted"),
            };
        }

        let delay = self.backoff_delay(failures);
        debug!(
            failures,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "will retry"
        );
        RetryDecision::Retry {
            delay,
            attempt: failures.saturating_add(1),
        }
    }

    /// Wait before retrying after the `failures`-th failure.
    #[must_use]
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let exponent = failures.min(self.max_exponent);
        self.backoff_unit.saturating_mul(2u32.saturating_pow(exponent))
    }
}
