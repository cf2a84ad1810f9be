//! Linear backoff for the approval call.
//!
//! Attempt *k* waits `k × base` before the next try, and no new retry is
//! started once `max_elapsed` has passed since the timer was created. With
//! `base = 5s` and `max_elapsed = 300s` the waits are 5, 10, 15, ..., 55s
//! (cumulative 330s, the first total at or past 300s), so the call is made
//! 12 times.

use std::time::Duration;

use tokio::time::Instant;

/// Configuration of the approval retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Increment added to the wait after each retry; also the first wait.
    pub base: Duration,

    /// Elapsed time after which no further retry is made.
    pub max_elapsed: Duration,
}

impl RetryConfig {
    /// Five-second steps for up to five minutes.
    pub const DEFAULT: Self = Self {
        base: Duration::from_secs(5),
        max_elapsed: Duration::from_secs(300),
    };

    /// Returns the waits a caller that always fails will go through.
    ///
    /// This mirrors [`RetryTimer`] without sleeping: waits accumulate
    /// until their sum reaches `max_elapsed`.
    #[cfg(test)]
    pub(crate) fn planned_waits(&self) -> Vec<Duration> {
        let mut waits = Vec::new();
        if self.base.is_zero() {
            return waits;
        }
        let mut elapsed = Duration::ZERO;
        let mut current = self.base;
        while elapsed < self.max_elapsed {
            waits.push(current);
            elapsed += current;
            current += self.base;
        }
        waits
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Mutable linear-backoff state for one retried operation.
#[derive(Debug, Clone)]
pub struct RetryTimer {
    start: Instant,
    base: Duration,
    current: Duration,
    max_elapsed: Duration,
}

impl RetryTimer {
    /// Starts a timer now.
    pub fn new(config: RetryConfig) -> Self {
        RetryTimer {
            start: Instant::now(),
            base: config.base,
            current: config.base,
            max_elapsed: config.max_elapsed,
        }
    }

    /// True once at least `max_elapsed` has passed since creation.
    pub fn is_timed_out(&self) -> bool {
        self.start.elapsed() >= self.max_elapsed
    }

    /// The wait the next [`retry`](Self::retry) will sleep for.
    pub fn current_interval(&self) -> Duration {
        self.current
    }

    /// Sleeps the current interval, then grows it by the base step.
    pub async fn retry(&mut self) {
        tokio::time::sleep(self.current).await;
        self.current += self.base;
    }
}
