use std::time::Duration;

use tradedesk_client::ConfigError;

use crate::backoff::{BackoffConfig, PollSchedule};

/// Default delay between healthy status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default bound on a single backend call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of consecutive failed polls before a session is abandoned.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Tracking configuration shared by every session a tracker starts.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Delay between healthy status polls.
    pub poll_interval: Duration,
    /// Bound on each `fetch_status` / `fetch_result` call.
    pub request_timeout: Duration,
    /// Consecutive transient failures tolerated before giving up.
    /// `0` polls forever.
    pub max_consecutive_failures: u32,
    /// Growth of the delay while polls keep failing.
    pub backoff: BackoffConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            backoff: BackoffConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                          | Default |
    /// |----------------------------------|---------|
    /// | `TRADEDESK_POLL_INTERVAL_SECS`   | `3`     |
    /// | `TRADEDESK_REQUEST_TIMEOUT_SECS` | `30`    |
    /// | `TRADEDESK_MAX_POLL_FAILURES`    | `10`    |
    /// | `TRADEDESK_BACKOFF_MAX_SECS`     | `30`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let poll_interval = env_secs("TRADEDESK_POLL_INTERVAL_SECS")?
            .unwrap_or(defaults.poll_interval);
        let request_timeout = env_secs("TRADEDESK_REQUEST_TIMEOUT_SECS")?
            .unwrap_or(defaults.request_timeout);
        let max_consecutive_failures = env_parse::<u32>("TRADEDESK_MAX_POLL_FAILURES")?
            .unwrap_or(defaults.max_consecutive_failures);
        let max_delay =
            env_secs("TRADEDESK_BACKOFF_MAX_SECS")?.unwrap_or(defaults.backoff.max_delay);

        if poll_interval.is_zero() {
            return Err(ConfigError::Invalid {
                var: "TRADEDESK_POLL_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            poll_interval,
            request_timeout,
            max_consecutive_failures,
            backoff: BackoffConfig {
                max_delay,
                ..defaults.backoff
            },
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    pub(crate) fn schedule(&self) -> PollSchedule {
        PollSchedule::new(
            self.poll_interval,
            self.backoff.clone(),
            self.max_consecutive_failures,
        )
    }
}

fn env_parse<T: std::str::FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value: raw }),
        Err(_) => Ok(None),
    }
}

fn env_secs(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(env_parse::<u64>(var)?.map(Duration::from_secs))
}
