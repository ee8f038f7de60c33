use std::time::Duration;

/// Default backend base URL for local development.
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connection context for one backend: where it lives and who we are.
///
/// Replaces process-wide token storage. Every request made through a
/// [`TradeDeskApi`](crate::api::TradeDeskApi) carries the session it was
/// built with, nothing else.
#[derive(Debug, Clone)]
pub struct Session {
    base_url: String,
    token: Option<String>,
    request_timeout: Duration,
}

impl Session {
    /// Create an unauthenticated session for `base_url`.
    ///
    /// A trailing slash is stripped so paths can be appended directly.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            token: None,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    /// Attach a bearer token sent as `Authorization: Bearer <token>`.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Load the session from environment variables with defaults.
    ///
    /// | Env Var                          | Default                 |
    /// |----------------------------------|-------------------------|
    /// | `TRADEDESK_API_URL`              | `http://localhost:8000` |
    /// | `TRADEDESK_API_TOKEN`            | none                    |
    /// | `TRADEDESK_REQUEST_TIMEOUT_SECS` | `30`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url =
            std::env::var("TRADEDESK_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.into());

        let token = std::env::var("TRADEDESK_API_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let timeout_secs = match std::env::var("TRADEDESK_REQUEST_TIMEOUT_SECS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid {
                var: "TRADEDESK_REQUEST_TIMEOUT_SECS",
                value: raw,
            })?,
            Err(_) => DEFAULT_REQUEST_TIMEOUT_SECS,
        };

        let mut session =
            Self::new(base_url).with_request_timeout(Duration::from_secs(timeout_secs));
        if let Some(token) = token {
            session = session.with_token(token);
        }
        Ok(session)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }
}

/// An environment variable held a value that could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}
