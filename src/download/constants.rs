//! Constants for the download engine (timeouts, cadences, limits).

use std::time::Duration;

/// Default HTTP connect timeout (60 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 60;

/// Default HTTP read timeout (5 minutes).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Minimum number of connections per job.
pub const MIN_CONNECTIONS: usize = 1;

/// Maximum number of connections per job.
pub const MAX_CONNECTIONS: usize = 50;

/// Default number of connections per job.
pub const DEFAULT_CONNECTIONS: usize = 4;

/// Heartbeat wake-up interval.
pub const HEARTBEAT_TICK: Duration = Duration::from_millis(200);

/// The heartbeat callback runs on every Nth tick (~0.8s cadence).
pub const HEARTBEAT_EVERY_TICKS: u32 = 4;

/// Granularity of the interruptible backoff countdown.
pub const BACKOFF_POLL_TICK: Duration = Duration::from_millis(500);

/// Number of samples kept by the heartbeat's speed meter.
pub const SPEED_WINDOW: usize = 3;

/// Smallest interval a speed sample is divided by.
pub const MIN_SPEED_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound of the scaled progress map (`[0, PROGRESS_SCALE]`).
pub const PROGRESS_SCALE: u32 = 1000;
