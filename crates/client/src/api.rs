//! REST API client for the TradeDesk backend job endpoints.
//!
//! Wraps job submission, status polling and result retrieval for both
//! job kinds using [`reqwest`]. Endpoint layout:
//!
//! | Operation         | Request                          |
//! |-------------------|----------------------------------|
//! | submit analysis   | `POST /api/analysis/start`       |
//! | submit backtest   | `POST /api/backtest/run`         |
//! | status            | `GET /api/{kind}/{id}/status`    |
//! | result            | `GET /api/{kind}/{id}/result`    |

use serde::Deserialize;
use tradedesk_core::{JobHandle, JobKind, JobResult, JobStatus};

use crate::session::Session;

/// HTTP client for one backend session.
pub struct TradeDeskApi {
    client: reqwest::Client,
    session: Session,
}

/// Body returned by the submit endpoints.
///
/// The backend names the new job's id differently per endpoint, so every
/// known spelling is accepted.
#[derive(Debug, Default, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    analysis_id: Option<String>,
    #[serde(default)]
    backtest_id: Option<String>,
    #[serde(default)]
    job_id: Option<String>,
}

impl SubmitResponse {
    fn into_job_id(self) -> Option<String> {
        self.id
            .or(self.analysis_id)
            .or(self.backtest_id)
            .or(self.job_id)
    }
}

/// Errors from the backend REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The response body was not the JSON shape we expected.
    #[error("Malformed response: {0}")]
    Decode(String),

    /// The backend rejected our credentials (401).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The credentials are valid but lack permission (403).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The job (or endpoint) does not exist (404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The result endpoint answered but had no result to give.
    #[error("Result for job {0} is unavailable")]
    ResultUnavailable(String),

    /// The session's base URL cannot carry job paths.
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    /// Any other non-2xx status code.
    #[error("Backend API error ({status}): {body}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ApiError {
    /// Whether retrying the same request later could plausibly succeed.
    ///
    /// Transport failures, malformed bodies, 408, 429 and 5xx are
    /// transient. Auth failures, missing jobs and other 4xx are not.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Request(_) | ApiError::Decode(_) => true,
            ApiError::Http { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            ApiError::Unauthorized(_)
            | ApiError::Forbidden(_)
            | ApiError::NotFound(_)
            | ApiError::ResultUnavailable(_)
            | ApiError::InvalidUrl(_) => false,
        }
    }

    /// Whether the backend refused access (401 or 403).
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_) | ApiError::Forbidden(_))
    }
}

impl TradeDeskApi {
    /// Create a client for `session`, applying its request timeout.
    pub fn new(session: Session) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(session.request_timeout())
            .build()?;
        Ok(Self { client, session })
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across several sessions).
    pub fn with_client(client: reqwest::Client, session: Session) -> Self {
        Self { client, session }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Submit a stock analysis run. Returns the new job's handle.
    pub async fn submit_analysis(
        &self,
        request: &serde_json::Value,
    ) -> Result<JobHandle, ApiError> {
        self.submit("/api/analysis/start", request).await
    }

    /// Submit a backtest run. Returns the new job's handle.
    pub async fn submit_backtest(
        &self,
        request: &serde_json::Value,
    ) -> Result<JobHandle, ApiError> {
        self.submit("/api/backtest/run", request).await
    }

    /// Fetch the latest status snapshot of a job.
    pub async fn fetch_status(
        &self,
        kind: JobKind,
        handle: &JobHandle,
    ) -> Result<JobStatus, ApiError> {
        let response = self
            .authorize(self.client.get(self.job_url(kind, handle, "status")?))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Fetch the result of a completed job.
    ///
    /// A `null` body means the backend has nothing to give yet and is
    /// reported as [`ApiError::ResultUnavailable`].
    pub async fn fetch_result(
        &self,
        kind: JobKind,
        handle: &JobHandle,
    ) -> Result<JobResult, ApiError> {
        let response = self
            .authorize(self.client.get(self.job_url(kind, handle, "result")?))
            .send()
            .await?;

        let value: serde_json::Value = Self::parse_response(response).await?;
        if value.is_null() {
            return Err(ApiError::ResultUnavailable(handle.to_string()));
        }
        Ok(JobResult::new(value))
    }

    // ---- private helpers ----

    async fn submit(&self, path: &str, request: &serde_json::Value) -> Result<JobHandle, ApiError> {
        let response = self
            .authorize(self.client.post(self.url(path)))
            .json(request)
            .send()
            .await?;

        let body: SubmitResponse = Self::parse_response(response).await?;
        let raw_id = body
            .into_job_id()
            .ok_or_else(|| ApiError::Decode("submit response carries no job id".to_string()))?;
        let handle = JobHandle::new(raw_id).map_err(|e| ApiError::Decode(e.to_string()))?;

        tracing::info!(path, job_id = %handle, "Job submitted");
        Ok(handle)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.session.base_url(), path)
    }

    /// Job endpoint URL. The handle is opaque, so it is percent-encoded as
    /// a single path segment.
    fn job_url(
        &self,
        kind: JobKind,
        handle: &JobHandle,
        leaf: &str,
    ) -> Result<reqwest::Url, ApiError> {
        let base = self.session.base_url();
        let mut url =
            reqwest::Url::parse(base).map_err(|e| ApiError::InvalidUrl(format!("{base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(base.to_string()))?
            .pop_if_empty()
            .extend(["api", kind.path_segment(), handle.as_str(), leaf]);
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.session.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or the matching typed error
    /// carrying the body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());

        Err(match status.as_u16() {
            401 => ApiError::Unauthorized(body),
            403 => ApiError::Forbidden(body),
            404 => ApiError::NotFound(body),
            code => ApiError::Http { status: code, body },
        })
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}
