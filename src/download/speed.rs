//! Sliding-window transfer rate estimate.

use std::collections::VecDeque;

use tokio::time::Instant;

use super::constants::{MIN_SPEED_INTERVAL, SPEED_WINDOW};

/// Estimates bytes per second from cumulative byte counts.
///
/// Keeps the last `window` `(bytes, instant)` samples; the rate is the byte
/// delta between the newest and oldest sample divided by their time delta,
/// floored at [`MIN_SPEED_INTERVAL`] so identical timestamps never divide
/// by zero. Timestamps come from the tokio clock, so a paused test runtime
/// controls the measured rate.
#[derive(Debug, Clone)]
pub struct SpeedMeter {
    window: usize,
    samples: VecDeque<(u64, Instant)>,
}

impl Default for SpeedMeter {
    fn default() -> Self {
        Self::new(SPEED_WINDOW)
    }
}

impl SpeedMeter {
    /// Creates a meter that remembers `window` samples (at least two).
    #[must_use]
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    /// Records `bytes_done` now and returns the current rate.
    pub fn touch(&mut self, bytes_done: u64) -> f64 {
        self.touch_at(bytes_done, Instant::now())
    }

    /// Records `bytes_done` at `at` and returns the current rate.
    pub fn touch_at(&mut self, bytes_done: u64, at: Instant) -> f64 {
        self.samples.push_back((bytes_done, at));
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }
        self.rate()
    }

    /// Current rate in bytes per second; zero until two samples exist.
    #[must_use]
    pub fn rate(&self) -> f64 {
        let (Some(&(first_bytes, first_at)), Some(&(last_bytes, last_at))) =
            (self.samples.front(), self.samples.back())
        else {
            return 0.0;
        };
        if self.samples.len() < 2 {
            return 0.0;
        }

        let elapsed = last_at
            .saturating_duration_since(first_at)
            .max(MIN_SPEED_INTERVAL);
        #[allow(clippy::cast_precision_loss)]
        let delta = last_bytes.saturating_sub(first_bytes) as f64;
        delta / elapsed.as_secs_f64()
    }
}
