//! Progress bar fed by the contractor heartbeat.

use std::time::Duration;

use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use mcdl_core::download::{Heartbeat, HeartbeatCallback};
use tracing::debug;

const BAR_TEMPLATE: &str =
    "{spinner} [{elapsed_precise}] [{bar:40}] {bytes}/{total_bytes} {msg} (eta {eta})";

pub(crate) fn is_dumb_terminal() -> bool {
    std::env::var("TERM")
        .map(|value| value.eq_ignore_ascii_case("dumb"))
        .unwrap_or(false)
}

pub(crate) fn should_show_progress(
    stderr_is_terminal: bool,
    quiet: bool,
    no_progress: bool,
    dumb_terminal: bool,
) -> bool {
    stderr_is_terminal && !quiet && !no_progress && !dumb_terminal
}

/// `12.5 MiB/s` style rate label.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn format_rate(bytes_per_sec: f64) -> String {
    let rate = if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
        bytes_per_sec as u64
    } else {
        0
    };
    format!("{}/s", HumanBytes(rate))
}

/// Terminal progress for one job; a no-op when disabled.
pub(crate) struct ProgressDisplay {
    bar: Option<ProgressBar>,
}

impl ProgressDisplay {
    pub(crate) fn new(enabled: bool, total_bytes: u64) -> Self {
        if !enabled {
            return Self { bar: None };
        }
        let bar = ProgressBar::new(total_bytes);
        bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar: Some(bar) }
    }

    /// Builds the heartbeat callback that drives this display.
    pub(crate) fn heartbeat_callback(&self) -> HeartbeatCallback {
        let bar = self.bar.clone();
        Box::new(move |beat: &Heartbeat| {
            let rate = format_rate(beat.speed);
            match &bar {
                Some(bar) => {
                    bar.set_position(beat.bytes_done);
                    bar.set_message(rate);
                }
                None => debug!(
                    bytes_done = beat.bytes_done,
                    bytes_total = beat.bytes_total,
                    speed = %rate,
                    is_final = beat.is_final,
                    "progress"
                ),
            }
        })
    }

    pub(crate) fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_show_progress_requires_plain_terminal() {
        assert!(should_show_progress(true, false, false, false));
        assert!(!should_show_progress(false, false, false, false));
        assert!(!should_show_progress(true, true, false, false));
        assert!(!should_show_progress(true, false, true, false));
        assert!(!should_show_progress(true, false, false, true));
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(0.0), "0 B/s");
        assert_eq!(format_rate(f64::NAN), "0 B/s");
        assert_eq!(format_rate(-5.0), "0 B/s");
        assert_eq!(format_rate(2048.0), "2.00 KiB/s");
    }

    #[test]
    fn test_disabled_display_accepts_heartbeats() {
        let display = ProgressDisplay::new(false, 100);
        let mut callback = display.heartbeat_callback();
        callback(&Heartbeat {
            bytes_done: 50,
            bytes_total: 100,
            speed: 10.0,
            spans: Vec::new(),
            is_final: false,
        });
        display.finish();
    }
}
