//! Retry policy for device connects and commands.
//!
//! Exponential backoff with a cap, and cancellation-aware sleeps.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default total attempts per connect or command.
pub const RETRY_MAX_ATTEMPTS: u32 = 2;

/// Initial retry delay in milliseconds.
pub const RETRY_INITIAL_DELAY_MS: u64 = 1000;

/// Backoff factor for exponential delay.
pub const RETRY_BACKOFF_FACTOR: u64 = 2;

/// Maximum delay between attempts.
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// How often, and how patiently, a failed operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_factor: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            initial_delay_ms: RETRY_INITIAL_DELAY_MS,
            backoff_factor: RETRY_BACKOFF_FACTOR,
            max_delay_ms: RETRY_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Retries with a fixed delay; handy in tests.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            max_attempts,
            initial_delay_ms: ms,
            backoff_factor: 1,
            max_delay_ms: ms,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (1 for the first retry).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = self
            .backoff_factor
            .max(1)
            .saturating_pow(retry.saturating_sub(1));
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Start tracking attempts for one operation.
    pub fn helper(&self) -> RetryHelper {
        RetryHelper {
            policy: *self,
            current_attempt: 1,
        }
    }
}

/// Sleep for the specified duration, respecting cancellation.
///
/// Returns false if cancelled before the delay elapsed.
pub async fn sleep_with_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Tracks attempts for one operation.
#[derive(Debug)]
pub struct RetryHelper {
    policy: RetryPolicy,
    current_attempt: u32,
}

impl RetryHelper {
    /// Check if another attempt is allowed and get the delay before it.
    ///
    /// Returns None once attempts are exhausted.
    pub fn next_attempt(&mut self) -> Option<Duration> {
        if self.current_attempt >= self.policy.attempts() {
            debug!(
                attempt = self.current_attempt,
                max = self.policy.attempts(),
                "Max retry attempts reached"
            );
            return None;
        }

        let delay = self.policy.delay(self.current_attempt);
        self.current_attempt += 1;
        debug!(
            attempt = self.current_attempt,
            max = self.policy.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );

        Some(delay)
    }

    /// The attempt currently in progress (1-based).
    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }
}
