//! The two backend operations a tracking session depends on.
//!
//! [`JobBackend`] is the seam between the polling loop and whatever
//! transport reaches the backend. [`HttpBackend`] implements it over
//! [`TradeDeskApi`] for one job kind.

use std::sync::Arc;

use async_trait::async_trait;
use tradedesk_client::{ApiError, TradeDeskApi};
use tradedesk_core::{JobHandle, JobKind, JobResult, JobStatus};

/// Status and result retrieval for one family of jobs.
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Latest status snapshot. Idempotent.
    async fn fetch_status(&self, handle: &JobHandle) -> Result<JobStatus, FetchError>;

    /// Result payload. Only called after a `completed` status was observed.
    async fn fetch_result(&self, handle: &JobHandle) -> Result<JobResult, FetchError>;
}

/// Why a backend call produced no data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Network trouble, malformed body or an overloaded backend.
    /// Worth trying again on the next tick.
    #[error("transient fetch failure: {0}")]
    Transient(String),

    /// The backend refused our credentials or permissions.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The backend does not know this job.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Any other rejection that retrying will not fix.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }
}

impl From<ApiError> for FetchError {
    fn from(err: ApiError) -> Self {
        if err.is_transient() {
            return FetchError::Transient(err.to_string());
        }
        match err {
            ApiError::Unauthorized(body) | ApiError::Forbidden(body) => {
                FetchError::AccessDenied(body)
            }
            ApiError::NotFound(body) => FetchError::NotFound(body),
            other => FetchError::Rejected(other.to_string()),
        }
    }
}

/// [`JobBackend`] over the backend's HTTP API for a single [`JobKind`].
#[derive(Clone)]
pub struct HttpBackend {
    api: Arc<TradeDeskApi>,
    kind: JobKind,
}

impl HttpBackend {
    pub fn new(api: Arc<TradeDeskApi>, kind: JobKind) -> Self {
        Self { api, kind }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }
}

#[async_trait]
impl JobBackend for HttpBackend {
    async fn fetch_status(&self, handle: &JobHandle) -> Result<JobStatus, FetchError> {
        Ok(self.api.fetch_status(self.kind, handle).await?)
    }

    async fn fetch_result(&self, handle: &JobHandle) -> Result<JobResult, FetchError> {
        Ok(self.api.fetch_result(self.kind, handle).await?)
    }
}
