//! Poll cadence with exponential backoff on consecutive failures.
//!
//! Healthy polls run at a fixed interval. When status fetches start
//! failing, the delay before the next attempt grows by
//! [`BackoffConfig::multiplier`] up to [`BackoffConfig::max_delay`], and
//! after [`PollSchedule`]'s failure ceiling the session gives up.

use std::time::Duration;

/// Tunable parameters for the failure backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Upper bound on the delay between failing attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Per-session poll timing state.
#[derive(Debug)]
pub struct PollSchedule {
    interval: Duration,
    backoff: BackoffConfig,
    /// 0 disables the ceiling.
    max_failures: u32,
    consecutive_failures: u32,
    failure_delay: Duration,
}

impl PollSchedule {
    pub fn new(interval: Duration, backoff: BackoffConfig, max_failures: u32) -> Self {
        Self {
            interval,
            backoff,
            max_failures,
            consecutive_failures: 0,
            failure_delay: interval,
        }
    }

    /// Record a successful poll and return the delay before the next one.
    pub fn on_success(&mut self) -> Duration {
        self.consecutive_failures = 0;
        self.failure_delay = self.interval;
        self.interval
    }

    /// Record a failed poll.
    ///
    /// Returns the delay before retrying, or `None` once the consecutive
    /// failure ceiling is reached.
    pub fn on_failure(&mut self) -> Option<Duration> {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.max_failures > 0 && self.consecutive_failures >= self.max_failures {
            return None;
        }
        let delay = self.failure_delay;
        self.failure_delay = next_delay(self.failure_delay, &self.backoff);
        Some(delay)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
