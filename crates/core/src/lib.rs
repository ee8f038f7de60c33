//! Shared domain types for TradeDesk job tracking.
//!
//! Holds the job identifiers, lifecycle phases and status snapshots that
//! both the HTTP client and the status tracker speak in. No I/O lives here.

pub mod error;
pub mod job;
pub mod job_events;
pub mod types;

pub use error::CoreError;
pub use job::{JobHandle, JobKind, JobPhase, JobResult, JobStatus};
