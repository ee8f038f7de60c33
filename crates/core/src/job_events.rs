//! Event type names for job tracking notifications.
//!
//! Used by the tracker's monitor when tagging broadcast events and by the
//! watch binary when logging them.

/// A fresh status snapshot was received for a tracked job.
pub const EVENT_JOB_UPDATE: &str = "job_update";

/// A tracked job settled (success or error outcome).
pub const EVENT_JOB_SETTLED: &str = "job_settled";

/// Tracking of a job was cancelled before it settled.
pub const EVENT_JOB_CANCELLED: &str = "job_cancelled";
