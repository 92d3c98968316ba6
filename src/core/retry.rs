//! Bounded exponential backoff for notification failures.

use std::time::Duration;

/// How many times, and how patiently, a failed arm or wait is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    jitter: bool,
}

impl RetryPolicy {
    /// Create a policy with jitter disabled.
    pub fn new(max_retries: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
            jitter: false,
        }
    }

    /// Fail on the first error, like an unhardened watcher.
    pub fn no_retry() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Randomize each delay by up to a quarter of its length.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Maximum number of retries.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before retry number `attempt` (1-based), or `None` once exhausted.
    ///
    /// Doubles from the initial backoff and saturates at the maximum.
    pub fn backoff(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_retries {
            return None;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        let base = self
            .initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff);

        if !self.jitter || base.is_zero() {
            return Some(base);
        }
        let spread = base / 4;
        let offset = spread.mul_f64(fastrand::f64());
        Some((base - spread / 2 + offset).min(self.max_backoff))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(250), Duration::from_secs(5)).with_jitter(true)
    }
}
