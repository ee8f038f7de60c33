//! Multi-job tracking hub.
//!
//! [`JobMonitor`] owns one [`JobTracker`] per job kind and any number of
//! live sessions keyed by `(kind, handle)`. Every status update and
//! outcome is republished as a [`TrackerEvent`] on a
//! [`tokio::sync::broadcast`] channel. Call [`JobMonitor::subscribe`]
//! before tracking to receive them.
//!
//! Sessions are independent: each owns its timer and a child of the
//! monitor's cancellation token.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tradedesk_client::TradeDeskApi;
use tradedesk_core::job_events::{EVENT_JOB_CANCELLED, EVENT_JOB_SETTLED, EVENT_JOB_UPDATE};
use tradedesk_core::{JobHandle, JobKind, JobStatus};

use crate::backend::{HttpBackend, JobBackend};
use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::observer::JobObserver;
use crate::outcome::JobOutcome;
use crate::session::{JobTracker, TrackingSession};

/// Broadcast channel capacity for tracker events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

type SessionKey = (JobKind, JobHandle);
type SessionMap = HashMap<SessionKey, Arc<TrackingSession>>;

/// A tracking event for one job.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    /// A fresh status snapshot arrived.
    Update { kind: JobKind, status: JobStatus },

    /// The session settled.
    Settled {
        kind: JobKind,
        handle: JobHandle,
        outcome: JobOutcome,
    },

    /// The session was cancelled through the monitor.
    Cancelled { kind: JobKind, handle: JobHandle },
}

impl TrackerEvent {
    /// Wire name of the event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            TrackerEvent::Update { .. } => EVENT_JOB_UPDATE,
            TrackerEvent::Settled { .. } => EVENT_JOB_SETTLED,
            TrackerEvent::Cancelled { .. } => EVENT_JOB_CANCELLED,
        }
    }

    pub fn kind(&self) -> JobKind {
        match self {
            TrackerEvent::Update { kind, .. }
            | TrackerEvent::Settled { kind, .. }
            | TrackerEvent::Cancelled { kind, .. } => *kind,
        }
    }

    pub fn handle(&self) -> &JobHandle {
        match self {
            TrackerEvent::Update { status, .. } => &status.id,
            TrackerEvent::Settled { handle, .. } | TrackerEvent::Cancelled { handle, .. } => {
                handle
            }
        }
    }
}

/// Tracks many jobs at once.
///
/// The returned `Arc` can be cheaply cloned into whatever needs it.
pub struct JobMonitor {
    trackers: HashMap<JobKind, JobTracker>,
    sessions: Arc<Mutex<SessionMap>>,
    event_tx: broadcast::Sender<TrackerEvent>,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
}

impl JobMonitor {
    /// A monitor with no backends registered yet.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            trackers: HashMap::new(),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// A monitor tracking both job kinds over one HTTP API client.
    pub fn for_api(api: Arc<TradeDeskApi>, config: TrackerConfig) -> Arc<Self> {
        let monitor = [JobKind::Analysis, JobKind::Backtest]
            .into_iter()
            .fold(Self::new(), |monitor, kind| {
                let backend = Arc::new(HttpBackend::new(Arc::clone(&api), kind));
                monitor.with_backend(kind, backend, config.clone())
            });
        Arc::new(monitor)
    }

    /// Register the backend used for jobs of `kind`.
    pub fn with_backend(
        mut self,
        kind: JobKind,
        backend: Arc<dyn JobBackend>,
        config: TrackerConfig,
    ) -> Self {
        self.trackers.insert(kind, JobTracker::new(backend, config));
        self
    }

    /// Replace the clock of every registered tracker.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.trackers = self
            .trackers
            .into_iter()
            .map(|(kind, tracker)| (kind, tracker.with_clock(Arc::clone(&clock))))
            .collect();
        self
    }

    /// Subscribe to tracker events.
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.event_tx.subscribe()
    }

    /// Start tracking a job.
    ///
    /// Fails if the kind has no backend, the job is already tracked, or
    /// the monitor has been shut down.
    pub fn track(
        &self,
        kind: JobKind,
        handle: JobHandle,
    ) -> Result<Arc<TrackingSession>, MonitorError> {
        if self.cancel.is_cancelled() {
            return Err(MonitorError::ShutDown);
        }
        let tracker = self
            .trackers
            .get(&kind)
            .ok_or(MonitorError::NoBackend(kind))?;

        // The map stays locked until the session is inserted, so a fast
        // settle cannot try to remove it before it exists.
        let mut sessions = lock(&self.sessions);
        let key = (kind, handle.clone());
        // A session cancelled through its own handle never settles, so its
        // entry is left behind in a terminal state and can be replaced.
        if sessions
            .get(&key)
            .is_some_and(|session| !session.state().is_terminal())
        {
            return Err(MonitorError::AlreadyTracking { kind, handle });
        }

        let observer = Arc::new(MonitorObserver {
            kind,
            handle: handle.clone(),
            sessions: Arc::clone(&self.sessions),
            event_tx: self.event_tx.clone(),
        });
        let session = Arc::new(tracker.start_with_token(
            handle.clone(),
            observer,
            self.cancel.child_token(),
        ));
        sessions.insert(key, Arc::clone(&session));

        tracing::info!(kind = %kind, job_id = %handle, "Tracking job");
        Ok(session)
    }

    /// Cancel tracking of a job.
    pub fn cancel(&self, kind: JobKind, handle: &JobHandle) -> Result<(), MonitorError> {
        // Release the map before cancelling: cancel waits for an in-flight
        // callback, and callbacks lock the map.
        let session = lock(&self.sessions)
            .remove(&(kind, handle.clone()))
            .filter(|session| !session.state().is_terminal())
            .ok_or_else(|| MonitorError::NotTracking {
                kind,
                handle: handle.clone(),
            })?;

        session.cancel();
        let _ = self.event_tx.send(TrackerEvent::Cancelled {
            kind,
            handle: handle.clone(),
        });
        Ok(())
    }

    /// Session for a tracked job, if it is still live.
    pub fn session(&self, kind: JobKind, handle: &JobHandle) -> Option<Arc<TrackingSession>> {
        lock(&self.sessions)
            .get(&(kind, handle.clone()))
            .filter(|session| !session.state().is_terminal())
            .cloned()
    }

    /// Keys of every live session. Drops entries of sessions that were
    /// cancelled directly.
    pub fn active(&self) -> Vec<(JobKind, JobHandle)> {
        let mut sessions = lock(&self.sessions);
        sessions.retain(|_, session| !session.state().is_terminal());
        sessions.keys().cloned().collect()
    }

    /// Cancel every session and wait for their tasks to exit.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down job monitor");
        self.cancel.cancel();
        let drained: Vec<(SessionKey, Arc<TrackingSession>)> =
            lock(&self.sessions).drain().collect();

        for ((kind, handle), session) in drained {
            tracing::info!(kind = %kind, job_id = %handle, "Stopping tracking session");
            session.cancel();
            session.join().await;
            let _ = self.event_tx.send(TrackerEvent::Cancelled { kind, handle });
        }

        tracing::info!("Job monitor shut down complete");
    }
}

impl Default for JobMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(sessions: &Mutex<SessionMap>) -> MutexGuard<'_, SessionMap> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forwards one session's callbacks onto the monitor's channel.
struct MonitorObserver {
    kind: JobKind,
    handle: JobHandle,
    sessions: Arc<Mutex<SessionMap>>,
    event_tx: broadcast::Sender<TrackerEvent>,
}

impl JobObserver for MonitorObserver {
    fn on_update(&self, status: &JobStatus) {
        let _ = self.event_tx.send(TrackerEvent::Update {
            kind: self.kind,
            status: status.clone(),
        });
    }

    fn on_settle(&self, outcome: JobOutcome) {
        {
            let key = (self.kind, self.handle.clone());
            let mut sessions = lock(&self.sessions);
            // Only drop the entry if it is this (now settled) session, not
            // a newer one started for the same job after a cancel.
            if sessions
                .get(&key)
                .is_some_and(|session| session.state().is_terminal())
            {
                sessions.remove(&key);
            }
        }

        match &outcome {
            JobOutcome::Success(_) => {
                tracing::info!(kind = %self.kind, job_id = %self.handle, "Tracked job settled");
            }
            JobOutcome::Error(err) => {
                tracing::warn!(
                    kind = %self.kind,
                    job_id = %self.handle,
                    reason = %err,
                    "Tracked job settled with error",
                );
            }
        }

        let _ = self.event_tx.send(TrackerEvent::Settled {
            kind: self.kind,
            handle: self.handle.clone(),
            outcome,
        });
    }
}

/// Errors that can occur when interacting with the monitor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MonitorError {
    /// No backend is registered for the requested job kind.
    #[error("No backend registered for {0} jobs")]
    NoBackend(JobKind),

    /// A live session already exists for this job.
    #[error("Job {handle} ({kind}) is already being tracked")]
    AlreadyTracking { kind: JobKind, handle: JobHandle },

    /// No live session exists for this job.
    #[error("Job {handle} ({kind}) is not being tracked")]
    NotTracking { kind: JobKind, handle: JobHandle },

    /// The monitor no longer accepts jobs.
    #[error("Job monitor has been shut down")]
    ShutDown,
}
