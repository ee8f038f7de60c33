//! Client-side tracking of long-running backend jobs.
//!
//! A [`JobTracker`] follows one job from a handle to a single terminal
//! [`JobOutcome`]: it polls the status endpoint on a fixed cadence, backs
//! off while the backend is unreachable, fetches the result exactly once
//! after completion, and can be cancelled at any point. [`JobMonitor`]
//! runs many such sessions side by side and republishes their progress on
//! a broadcast channel.

pub mod backend;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod monitor;
pub mod observer;
pub mod outcome;
pub mod session;

pub use backend::{FetchError, HttpBackend, JobBackend};
pub use clock::{Clock, RecordingClock, TokioClock};
pub use config::TrackerConfig;
pub use monitor::{JobMonitor, MonitorError, TrackerEvent};
pub use observer::{FnObserver, JobObserver};
pub use outcome::{JobOutcome, SettleError};
pub use session::{JobTracker, SessionState, TrackingSession};
