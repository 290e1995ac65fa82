//! Scoped timing of device operations.
//!
//! ```rust,ignore
//! let _timing = TimingGuard::command("r1", "show version");
//! // ... run the command ...
//! // the duration is logged when `_timing` drops
//! ```

use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Below this an operation is logged at debug level.
const NOTABLE_AFTER: Duration = Duration::from_millis(100);
/// At or above this an operation is logged as slow.
const SLOW_AFTER: Duration = Duration::from_secs(5);

/// Logs how long it lived when dropped.
pub struct TimingGuard {
    kind: &'static str,
    subject: String,
    started: Instant,
    notable_after: Duration,
    slow_after: Duration,
}

impl TimingGuard {
    pub fn new(kind: &'static str, subject: impl Into<String>) -> Self {
        let subject = subject.into();
        trace!(kind, subject = %subject, "Operation started");
        Self {
            kind,
            subject,
            started: Instant::now(),
            notable_after: NOTABLE_AFTER,
            slow_after: SLOW_AFTER,
        }
    }

    /// Opening a session to `device`.
    pub fn connect(device: &str) -> Self {
        Self::new("connect", device)
    }

    /// Running `command` on `device`.
    pub fn command(device: &str, command: &str) -> Self {
        Self::new("command", format!("{device}: {command}"))
    }

    pub fn with_thresholds(mut self, notable_after: Duration, slow_after: Duration) -> Self {
        self.notable_after = notable_after;
        self.slow_after = slow_after;
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let duration = format_duration(elapsed);
        let (kind, subject) = (self.kind, &self.subject);

        if elapsed >= self.slow_after {
            warn!(kind, subject = %subject, duration_ms, %duration, "Slow device operation");
        } else if elapsed >= self.notable_after {
            info!(kind, subject = %subject, duration_ms, %duration, "Device operation finished");
        } else {
            debug!(kind, subject = %subject, duration_ms, %duration, "Device operation finished");
        }
    }
}

/// Format a duration for humans: `850ms`, `2.40s`, `3m 12.0s`.
pub fn format_duration(duration: Duration) -> String {
    match duration.as_millis() {
        ms @ 0..=999 => format!("{ms}ms"),
        1_000..=59_999 => format!("{:.2}s", duration.as_secs_f64()),
        ms => format!("{}m {:.1}s", ms / 60_000, duration.as_secs_f64() % 60.0),
    }
}
