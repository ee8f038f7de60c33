use tradedesk_core::JobStatus;

use crate::outcome::JobOutcome;

/// Receives a session's status snapshots and its single outcome.
///
/// Calls for one session are serialized: never concurrent, never
/// re-entrant. Implementations should return quickly; they run on the
/// session's polling task.
pub trait JobObserver: Send + Sync + 'static {
    /// Called for every status snapshot received, including the first.
    fn on_update(&self, status: &JobStatus);

    /// Called exactly once when the session settles. Never called for a
    /// cancelled session.
    fn on_settle(&self, outcome: JobOutcome);
}

/// Adapts a pair of closures into a [`JobObserver`].
pub struct FnObserver<U, S> {
    on_update: U,
    on_settle: S,
}

impl<U, S> FnObserver<U, S>
where
    U: Fn(&JobStatus) + Send + Sync + 'static,
    S: Fn(JobOutcome) + Send + Sync + 'static,
{
    pub fn new(on_update: U, on_settle: S) -> Self {
        Self {
            on_update,
            on_settle,
        }
    }
}

impl<U, S> JobObserver for FnObserver<U, S>
where
    U: Fn(&JobStatus) + Send + Sync + 'static,
    S: Fn(JobOutcome) + Send + Sync + 'static,
{
    fn on_update(&self, status: &JobStatus) {
        (self.on_update)(status)
    }

    fn on_settle(&self, outcome: JobOutcome) {
        (self.on_settle)(outcome)
    }
}
