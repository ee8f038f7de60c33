//! What the watcher should follow, resolved from arguments and environment.

use tradedesk_client::{ApiError, ConfigError};
use tradedesk_core::{CoreError, JobHandle, JobKind};
use tradedesk_tracker::MonitorError;

/// Jobs to watch, or a job to submit and then watch.
#[derive(Debug, Clone, PartialEq)]
pub struct WatchTarget {
    pub kind: JobKind,
    /// Existing jobs to attach to. Empty when `submit` is set.
    pub handles: Vec<JobHandle>,
    /// Request body for a new job.
    pub submit: Option<serde_json::Value>,
}

impl WatchTarget {
    /// Resolve the target from the process environment.
    ///
    /// | Env Var          | Default    |
    /// |------------------|------------|
    /// | `JOB_KIND`       | `analysis` |
    /// | `JOB_ID`         | none       |
    /// | `SUBMIT_REQUEST` | none       |
    ///
    /// Positional `args` take precedence over `JOB_ID`.
    pub fn from_env(args: impl IntoIterator<Item = String>) -> Result<Self, WatchError> {
        Self::resolve(
            std::env::var("JOB_KIND").ok(),
            std::env::var("JOB_ID").ok(),
            std::env::var("SUBMIT_REQUEST").ok(),
            args,
        )
    }

    pub fn resolve(
        kind: Option<String>,
        job_id: Option<String>,
        submit: Option<String>,
        args: impl IntoIterator<Item = String>,
    ) -> Result<Self, WatchError> {
        let kind = match kind.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            Some(raw) => raw.parse::<JobKind>()?,
            None => JobKind::Analysis,
        };

        let mut raw_ids: Vec<String> = args.into_iter().collect();
        if raw_ids.is_empty() {
            raw_ids.extend(job_id.filter(|id| !id.trim().is_empty()));
        }

        let mut handles: Vec<JobHandle> = Vec::with_capacity(raw_ids.len());
        for raw in raw_ids {
            let handle = JobHandle::new(raw)?;
            if !handles.contains(&handle) {
                handles.push(handle);
            }
        }

        let submit = submit
            .filter(|body| !body.trim().is_empty())
            .map(|body| {
                serde_json::from_str::<serde_json::Value>(&body)
                    .map_err(|e| WatchError::InvalidRequest(e.to_string()))
            })
            .transpose()?;

        match (&submit, handles.is_empty()) {
            (Some(_), false) => Err(WatchError::Conflicting),
            (None, true) => Err(WatchError::MissingJob),
            _ => Ok(Self {
                kind,
                handles,
                submit,
            }),
        }
    }
}

/// Errors that stop the watcher before or while it runs.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("No job to watch: set JOB_ID, pass job ids as arguments, or set SUBMIT_REQUEST")]
    MissingJob,

    #[error("SUBMIT_REQUEST is not valid JSON: {0}")]
    InvalidRequest(String),

    #[error("SUBMIT_REQUEST cannot be combined with job ids")]
    Conflicting,

    #[error("Backend request failed: {0}")]
    Api(#[from] ApiError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}
