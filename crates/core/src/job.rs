//! Job identifiers, lifecycle phases and status snapshots.
//!
//! The backend owns every job; these types only describe what a client
//! has observed about one. A [`JobStatus`] is a cached snapshot that must
//! always defer to the most recent poll.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// JobHandle
// ---------------------------------------------------------------------------

/// Opaque identifier for one asynchronous unit of backend work.
///
/// Always non-empty. Construct with [`JobHandle::new`] or by deserializing;
/// both reject empty and whitespace-only strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CoreError::Validation(
                "job handle must not be empty".to_string(),
            ));
        }
        if trimmed.len() != raw.len() {
            return Ok(Self(trimmed.to_string()));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for JobHandle {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobHandle> for String {
    fn from(handle: JobHandle) -> Self {
        handle.0
    }
}

impl FromStr for JobHandle {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// JobKind
// ---------------------------------------------------------------------------

/// The two families of long-running backend work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// A trading-agent stock analysis run.
    Analysis,
    /// A strategy backtest run.
    Backtest,
}

impl JobKind {
    /// URL path segment for this kind's endpoints (`/api/{segment}/...`).
    pub fn path_segment(self) -> &'static str {
        match self {
            JobKind::Analysis => "analysis",
            JobKind::Backtest => "backtest",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

impl FromStr for JobKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "analysis" => Ok(JobKind::Analysis),
            "backtest" => Ok(JobKind::Backtest),
            other => Err(CoreError::Validation(format!(
                "unknown job kind '{other}' (expected 'analysis' or 'backtest')"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// JobPhase
// ---------------------------------------------------------------------------

/// Coarse lifecycle state of a job.
///
/// Deserialization never fails: unrecognized values map to
/// [`JobPhase::Running`] so that new backend states keep the tracker
/// polling instead of stopping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum JobPhase {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobPhase {
    /// Parse a backend phase string, case-insensitively.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => JobPhase::Pending,
            "running" => JobPhase::Running,
            "completed" | "success" | "done" => JobPhase::Completed,
            "failed" | "error" => JobPhase::Failed,
            _ => JobPhase::Running,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Completed | JobPhase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Pending => "pending",
            JobPhase::Running => "running",
            JobPhase::Completed => "completed",
            JobPhase::Failed => "failed",
        }
    }

    fn rank(self) -> u8 {
        match self {
            JobPhase::Pending => 0,
            JobPhase::Running => 1,
            JobPhase::Completed | JobPhase::Failed => 2,
        }
    }

    /// Whether `self` is a legal successor of `previous`.
    ///
    /// Phases only move forward; a terminal phase may only repeat itself.
    pub fn can_follow(self, previous: JobPhase) -> bool {
        if previous.is_terminal() {
            return self == previous;
        }
        self.rank() >= previous.rank()
    }
}

impl From<String> for JobPhase {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// A snapshot of job progress as reported by the backend's status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(alias = "analysis_id", alias = "backtest_id", alias = "job_id")]
    pub id: JobHandle,

    #[serde(alias = "status")]
    pub phase: JobPhase,

    /// Free-form display text. Never used to decide anything.
    #[serde(default, alias = "progress", alias = "message")]
    pub progress_text: Option<String>,

    /// Failure detail, only meaningful when `phase` is `failed`.
    #[serde(default, alias = "error")]
    pub error_text: Option<String>,

    #[serde(default)]
    pub created_at: Option<Timestamp>,
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
}

impl JobStatus {
    /// A bare snapshot with no text or timestamps.
    pub fn new(id: JobHandle, phase: JobPhase) -> Self {
        Self {
            id,
            phase,
            progress_text: None,
            error_text: None,
            created_at: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_progress(mut self, text: impl Into<String>) -> Self {
        self.progress_text = Some(text.into());
        self
    }

    pub fn with_error(mut self, text: impl Into<String>) -> Self {
        self.error_text = Some(text.into());
        self
    }

    pub fn with_timestamps(
        mut self,
        created_at: Option<Timestamp>,
        started_at: Option<Timestamp>,
        completed_at: Option<Timestamp>,
    ) -> Self {
        self.created_at = created_at;
        self.started_at = started_at;
        self.completed_at = completed_at;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Check the snapshot against the backend's documented invariants.
    ///
    /// - `completed_at` is set iff the phase is terminal.
    /// - `error_text` only accompanies a `failed` phase.
    /// - present timestamps never decrease (created, started, completed).
    ///
    /// Violations are reported, not corrected.
    pub fn check_invariants(&self) -> Result<(), CoreError> {
        let violation = |detail: String| CoreError::Invariant {
            handle: self.id.to_string(),
            detail,
        };

        if self.is_terminal() != self.completed_at.is_some() {
            return Err(violation(format!(
                "phase '{}' with completed_at {}",
                self.phase,
                if self.completed_at.is_some() { "set" } else { "unset" },
            )));
        }

        if self.error_text.is_some() && self.phase != JobPhase::Failed {
            return Err(violation(format!(
                "error_text present on phase '{}'",
                self.phase
            )));
        }

        let ordered = [self.created_at, self.started_at, self.completed_at];
        let mut last: Option<Timestamp> = None;
        for ts in ordered.into_iter().flatten() {
            if let Some(prev) = last {
                if ts < prev {
                    return Err(violation("timestamps go backwards".to_string()));
                }
            }
            last = Some(ts);
        }

        Ok(())
    }

    /// Best-effort percentage pulled out of `progress_text`.
    ///
    /// Looks for the first `NN%` or `NN.N%` token and clamps it to 0..=100.
    /// Display-only; tracking never looks at this.
    pub fn progress_percent(&self) -> Option<u8> {
        let text = self.progress_text.as_deref()?;
        for (idx, ch) in text.char_indices() {
            if ch != '%' {
                continue;
            }
            let head = &text[..idx];
            let prefix = head.trim_end_matches(|c: char| c.is_ascii_digit() || c == '.');
            if let Ok(value) = head[prefix.len()..].parse::<f64>() {
                return Some(value.clamp(0.0, 100.0).round() as u8);
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// JobResult
// ---------------------------------------------------------------------------

/// Opaque result payload of a completed job. Shape depends on the job kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobResult(serde_json::Value);

impl JobResult {
    pub fn new(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
