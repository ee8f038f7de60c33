//! Command-line watcher for TradeDesk backend jobs.
//!
//! Resolves which jobs to follow from the environment, optionally submits a
//! new one, then follows them through a [`tradedesk_tracker::JobMonitor`]
//! until each settles.

pub mod runner;
pub mod target;

pub use runner::{watch_jobs, WatchSummary};
pub use target::{WatchError, WatchTarget};
