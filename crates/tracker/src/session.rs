//! Tracking sessions: one job, one polling task, one outcome.
//!
//! [`JobTracker::start`] spawns a task that drives the session through
//! `Idle -> Polling -> {Completed, Failed, Cancelled}`. At most one backend
//! call is in flight per session; the next poll is scheduled only after
//! the previous one finished.
//!
//! Callback delivery and [`TrackingSession::cancel`] share a gate, so once
//! `cancel` returns the observer hears nothing more from the session. That
//! holds when `cancel` is called from inside the session's own callback
//! too: the gate is skipped for the thread already delivering.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tradedesk_core::{JobHandle, JobPhase, JobStatus};

use crate::backend::{FetchError, JobBackend};
use crate::clock::{Clock, TokioClock};
use crate::config::TrackerConfig;
use crate::observer::{FnObserver, JobObserver};
use crate::outcome::{JobOutcome, SettleError};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Session whose callback is currently running on this thread.
    static DELIVERING: Cell<Option<u64>> = const { Cell::new(None) };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of one tracking session. The last three states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Polling,
    Completed,
    Failed,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Cancelled
        )
    }
}

// ---------------------------------------------------------------------------
// Shared session core
// ---------------------------------------------------------------------------

struct Shared {
    id: u64,
    handle: JobHandle,
    state: Mutex<SessionState>,
    /// Held for the duration of every observer call.
    delivery: Mutex<()>,
    cancel: CancellationToken,
}

/// Marks the current thread as delivering for a session until dropped.
struct DeliveryScope {
    previous: Option<u64>,
}

impl DeliveryScope {
    fn enter(session_id: u64) -> Self {
        let previous = DELIVERING.with(|d| d.replace(Some(session_id)));
        Self { previous }
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        DELIVERING.with(|d| d.set(self.previous));
    }
}

impl Shared {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// `Idle -> Polling`. Returns false if the session was cancelled first.
    fn begin_polling(&self) -> bool {
        let mut state = lock(&self.state);
        if *state != SessionState::Idle || self.cancel.is_cancelled() {
            return false;
        }
        *state = SessionState::Polling;
        true
    }

    fn deliver_update(&self, observer: &dyn JobObserver, status: &JobStatus) -> bool {
        let _gate = lock(&self.delivery);
        if self.cancel.is_cancelled() {
            return false;
        }
        let _scope = DeliveryScope::enter(self.id);
        observer.on_update(status);
        true
    }

    fn settle(&self, observer: &dyn JobObserver, outcome: JobOutcome) -> bool {
        let _gate = lock(&self.delivery);
        if self.cancel.is_cancelled() {
            return false;
        }
        {
            let mut state = lock(&self.state);
            if state.is_terminal() {
                return false;
            }
            *state = if outcome.is_success() {
                SessionState::Completed
            } else {
                SessionState::Failed
            };
        }
        let _scope = DeliveryScope::enter(self.id);
        observer.on_settle(outcome);
        true
    }

    fn cancel(&self) {
        self.cancel.cancel();
        let reentrant = DELIVERING.with(|d| d.get() == Some(self.id));
        // Wait out a callback running on another thread.
        let _gate = (!reentrant).then(|| lock(&self.delivery));
        self.mark_cancelled();
    }

    fn mark_cancelled(&self) {
        let mut state = lock(&self.state);
        if !state.is_terminal() {
            *state = SessionState::Cancelled;
        }
    }
}

// ---------------------------------------------------------------------------
// TrackingSession
// ---------------------------------------------------------------------------

/// Handle to one running tracking session.
///
/// Dropping the handle does not stop the session; call [`cancel`](Self::cancel).
pub struct TrackingSession {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TrackingSession {
    /// Process-unique session id.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn handle(&self) -> &JobHandle {
        &self.shared.handle
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Stop tracking. Idempotent, and a no-op after the session settled.
    ///
    /// A backend call already in flight is dropped at its next await; its
    /// response, if any, is discarded.
    pub fn cancel(&self) {
        let before = self.shared.state();
        self.shared.cancel();
        if !before.is_terminal() {
            tracing::debug!(job_id = %self.shared.handle, "Tracking session cancelled");
        }
    }

    /// Wait for the background task to exit.
    pub async fn join(&self) {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(job_id = %self.shared.handle, error = %e, "Tracking task aborted");
            }
        }
    }
}

impl fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackingSession")
            .field("id", &self.shared.id)
            .field("handle", &self.shared.handle)
            .field("state", &self.shared.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// JobTracker
// ---------------------------------------------------------------------------

/// Starts tracking sessions against one backend.
#[derive(Clone)]
pub struct JobTracker {
    backend: Arc<dyn JobBackend>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
}

impl JobTracker {
    pub fn new(backend: Arc<dyn JobBackend>, config: TrackerConfig) -> Self {
        Self {
            backend,
            clock: Arc::new(TokioClock),
            config,
        }
    }

    /// Replace the clock used for waits between polls.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Start tracking `handle`, reporting through a pair of callbacks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start<U, S>(&self, handle: JobHandle, on_update: U, on_settle: S) -> TrackingSession
    where
        U: Fn(&JobStatus) + Send + Sync + 'static,
        S: Fn(JobOutcome) + Send + Sync + 'static,
    {
        self.start_observer(handle, Arc::new(FnObserver::new(on_update, on_settle)))
    }

    /// Start tracking `handle`, reporting to `observer`.
    pub fn start_observer(
        &self,
        handle: JobHandle,
        observer: Arc<dyn JobObserver>,
    ) -> TrackingSession {
        self.start_with_token(handle, observer, CancellationToken::new())
    }

    pub(crate) fn start_with_token(
        &self,
        handle: JobHandle,
        observer: Arc<dyn JobObserver>,
        cancel: CancellationToken,
    ) -> TrackingSession {
        let shared = Arc::new(Shared {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            handle,
            state: Mutex::new(SessionState::Idle),
            delivery: Mutex::new(()),
            cancel,
        });

        let poller = Poller {
            shared: Arc::clone(&shared),
            backend: Arc::clone(&self.backend),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
            observer,
        };
        let task = tokio::spawn(poller.run());

        TrackingSession {
            shared,
            task: Mutex::new(Some(task)),
        }
    }
}

// ---------------------------------------------------------------------------
// Polling loop
// ---------------------------------------------------------------------------

struct Poller {
    shared: Arc<Shared>,
    backend: Arc<dyn JobBackend>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
    observer: Arc<dyn JobObserver>,
}

impl Poller {
    async fn run(self) {
        let handle = &self.shared.handle;
        if !self.shared.begin_polling() {
            tracing::debug!(job_id = %handle, "Session cancelled before polling started");
            return;
        }
        tracing::debug!(
            job_id = %handle,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Tracking started",
        );

        let mut schedule = self.config.schedule();
        let mut last_phase: Option<JobPhase> = None;

        loop {
            let polled = tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => break,
                polled = tokio::time::timeout(
                    self.config.request_timeout,
                    self.backend.fetch_status(handle),
                ) => polled,
            };

            let fetched = polled.unwrap_or_else(|_| {
                Err(FetchError::Transient(format!(
                    "status request timed out after {}ms",
                    self.config.request_timeout.as_millis()
                )))
            });

            let delay = match fetched {
                Ok(status) => {
                    self.inspect(&status, last_phase);
                    last_phase = Some(status.phase);

                    if !self.shared.deliver_update(self.observer.as_ref(), &status) {
                        break;
                    }

                    match status.phase {
                        JobPhase::Completed => {
                            self.finish().await;
                            return;
                        }
                        JobPhase::Failed => {
                            let err = SettleError::job_failed(status.error_text.as_deref());
                            tracing::info!(job_id = %handle, reason = %err, "Job failed");
                            self.shared
                                .settle(self.observer.as_ref(), JobOutcome::Error(err));
                            return;
                        }
                        JobPhase::Pending | JobPhase::Running => schedule.on_success(),
                    }
                }
                Err(err) if !err.is_transient() => {
                    tracing::warn!(job_id = %handle, error = %err, "Status request rejected");
                    self.shared.settle(
                        self.observer.as_ref(),
                        JobOutcome::Error(SettleError::Rejected(err)),
                    );
                    return;
                }
                Err(err) => match schedule.on_failure() {
                    Some(delay) => {
                        tracing::warn!(
                            job_id = %handle,
                            error = %err,
                            failures = schedule.consecutive_failures(),
                            retry_in_ms = delay.as_millis() as u64,
                            "Status poll failed",
                        );
                        delay
                    }
                    None => {
                        let attempts = schedule.consecutive_failures();
                        tracing::error!(
                            job_id = %handle,
                            error = %err,
                            attempts,
                            "Polling abandoned",
                        );
                        self.shared.settle(
                            self.observer.as_ref(),
                            JobOutcome::Error(SettleError::PollingAbandoned { attempts }),
                        );
                        return;
                    }
                },
            };

            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => break,
                _ = self.clock.sleep(delay) => {}
            }
        }

        self.shared.mark_cancelled();
        tracing::debug!(job_id = %handle, "Tracking stopped by cancellation");
    }

    /// Fetch the result once after a `completed` status and settle.
    async fn finish(&self) {
        let handle = &self.shared.handle;
        let fetched = tokio::select! {
            biased;
            _ = self.shared.cancel.cancelled() => {
                self.shared.mark_cancelled();
                return;
            }
            fetched = tokio::time::timeout(
                self.config.request_timeout,
                self.backend.fetch_result(handle),
            ) => fetched,
        };

        let outcome = match fetched {
            Ok(Ok(result)) => {
                tracing::info!(job_id = %handle, "Job completed");
                JobOutcome::Success(result)
            }
            Ok(Err(err)) => {
                tracing::error!(
                    job_id = %handle,
                    error = %err,
                    "Job reported completed but result fetch failed",
                );
                JobOutcome::Error(SettleError::ResultFetchFailed {
                    cause: err.to_string(),
                })
            }
            Err(_) => {
                tracing::error!(job_id = %handle, "Result request timed out");
                JobOutcome::Error(SettleError::ResultFetchFailed {
                    cause: "result request timed out".to_string(),
                })
            }
        };

        self.shared.settle(self.observer.as_ref(), outcome);
    }

    /// Log anything odd about a snapshot. Never alters control flow.
    fn inspect(&self, status: &JobStatus, previous: Option<JobPhase>) {
        let handle = &self.shared.handle;

        if status.id != *handle {
            tracing::warn!(
                job_id = %handle,
                reported_id = %status.id,
                "Status snapshot names a different job",
            );
        }
        if let Err(e) = status.check_invariants() {
            tracing::warn!(job_id = %handle, error = %e, "Status snapshot breaks lifecycle invariants");
        }
        if let Some(previous) = previous {
            if !status.phase.can_follow(previous) {
                tracing::warn!(
                    job_id = %handle,
                    from = %previous,
                    to = %status.phase,
                    "Job phase moved backwards",
                );
            }
        }

        tracing::debug!(
            job_id = %handle,
            phase = %status.phase,
            progress = status.progress_text.as_deref().unwrap_or(""),
            "Status received",
        );
    }
}
