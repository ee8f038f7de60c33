use tradedesk_core::JobResult;

use crate::backend::FetchError;

/// The single terminal result of a tracking session.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// The job completed and its result was fetched.
    Success(JobResult),
    /// The job failed, or tracking could not reach a result.
    Error(SettleError),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success(_))
    }

    /// Human-readable failure reason, `None` on success.
    pub fn reason(&self) -> Option<String> {
        match self {
            JobOutcome::Success(_) => None,
            JobOutcome::Error(err) => Some(err.to_string()),
        }
    }
}

/// Why a session settled without a result.
///
/// The `Display` text is the reason shown to the user.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettleError {
    /// The backend reported `failed` for the job.
    #[error("{0}")]
    JobFailed(String),

    /// Status said `completed` but the result could not be fetched.
    /// Points at an inconsistency between the two endpoints.
    #[error("result fetch failed")]
    ResultFetchFailed { cause: String },

    /// Too many consecutive status polls failed.
    #[error("polling abandoned after {attempts} consecutive failures")]
    PollingAbandoned { attempts: u32 },

    /// The backend refused the status request outright.
    #[error(transparent)]
    Rejected(#[from] FetchError),
}

impl SettleError {
    /// Failure reason for a `failed` status, falling back to a generic text
    /// when the backend gave none.
    pub fn job_failed(error_text: Option<&str>) -> Self {
        let reason = error_text
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("job failed");
        SettleError::JobFailed(reason.to_string())
    }
}
