//! Follow a set of jobs through a [`JobMonitor`] until each one settles.

use std::collections::HashSet;
use std::future::Future;

use tokio::sync::broadcast::error::RecvError;
use tradedesk_core::job_events::{EVENT_JOB_CANCELLED, EVENT_JOB_SETTLED, EVENT_JOB_UPDATE};
use tradedesk_core::{JobHandle, JobKind, JobStatus};
use tradedesk_tracker::{JobMonitor, JobOutcome, MonitorError, TrackerEvent};

/// How every watched job ended.
#[derive(Debug, Default)]
pub struct WatchSummary {
    /// Settled jobs, in settlement order.
    pub outcomes: Vec<(JobHandle, JobOutcome)>,
    /// Jobs stopped before they settled.
    pub cancelled: Vec<JobHandle>,
    /// Jobs whose settlement event was dropped by a lagging receiver.
    pub lost: Vec<JobHandle>,
}

impl WatchSummary {
    /// True when every job settled successfully.
    pub fn is_success(&self) -> bool {
        self.cancelled.is_empty()
            && self.lost.is_empty()
            && self.outcomes.iter().all(|(_, outcome)| outcome.is_success())
    }

    /// Results of the successful jobs as JSON.
    ///
    /// A single job yields its result as is; several yield an object keyed
    /// by job id. `None` when nothing succeeded.
    pub fn results_json(&self) -> Option<serde_json::Value> {
        let results: Vec<(&JobHandle, &serde_json::Value)> = self
            .outcomes
            .iter()
            .filter_map(|(handle, outcome)| match outcome {
                JobOutcome::Success(result) => Some((handle, result.as_value())),
                JobOutcome::Error(_) => None,
            })
            .collect();

        match results.as_slice() {
            [] => None,
            [(_, value)] if self.outcomes.len() == 1 => Some((*value).clone()),
            _ => Some(serde_json::Value::Object(
                results
                    .into_iter()
                    .map(|(handle, value)| (handle.to_string(), value.clone()))
                    .collect(),
            )),
        }
    }
}

/// Track `handles` and wait until each settles or `shutdown` resolves.
///
/// On shutdown every live session is cancelled and reported as such.
pub async fn watch_jobs<F>(
    monitor: &JobMonitor,
    kind: JobKind,
    handles: Vec<JobHandle>,
    shutdown: F,
) -> Result<WatchSummary, MonitorError>
where
    F: Future<Output = ()>,
{
    let mut events = monitor.subscribe();
    let mut pending: HashSet<JobHandle> = HashSet::with_capacity(handles.len());
    for handle in handles {
        if let Err(e) = monitor.track(kind, handle.clone()) {
            // Stop the sessions already started; nobody would watch them.
            monitor.shutdown().await;
            return Err(e);
        }
        pending.insert(handle);
    }

    let mut summary = WatchSummary::default();
    tokio::pin!(shutdown);

    while !pending.is_empty() {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::warn!(pending = pending.len(), "Interrupted, cancelling tracking");
                monitor.shutdown().await;
                summary.cancelled.extend(pending.drain());
            }
            event = events.recv() => match event {
                Ok(TrackerEvent::Update { status, .. }) => log_update(&status),
                Ok(event @ TrackerEvent::Settled { .. }) | Ok(event @ TrackerEvent::Cancelled { .. })
                    if !pending.contains(event.handle()) =>
                {
                    tracing::debug!(
                        event = event.event_type(),
                        job_id = %event.handle(),
                        "Ignoring event for unwatched job",
                    );
                }
                Ok(TrackerEvent::Settled { handle, outcome, .. }) => {
                    tracing::info!(
                        event = EVENT_JOB_SETTLED,
                        job_id = %handle,
                        success = outcome.is_success(),
                        "Job settled",
                    );
                    pending.remove(&handle);
                    summary.outcomes.push((handle, outcome));
                }
                Ok(TrackerEvent::Cancelled { handle, .. }) => {
                    tracing::info!(event = EVENT_JOB_CANCELLED, job_id = %handle, "Tracking cancelled");
                    pending.remove(&handle);
                    summary.cancelled.push(handle);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event receiver lagged");
                    // Sessions that settled meanwhile are gone from the monitor.
                    let gone: Vec<JobHandle> = pending
                        .iter()
                        .filter(|handle| monitor.session(kind, handle).is_none())
                        .cloned()
                        .collect();
                    for handle in gone {
                        pending.remove(&handle);
                        summary.lost.push(handle);
                    }
                }
                Err(RecvError::Closed) => {
                    summary.lost.extend(pending.drain());
                }
            }
        }
    }

    Ok(summary)
}

fn log_update(status: &JobStatus) {
    match status.progress_percent() {
        Some(percent) => tracing::info!(
            event = EVENT_JOB_UPDATE,
            job_id = %status.id,
            phase = %status.phase,
            percent,
            progress = status.progress_text.as_deref().unwrap_or(""),
            "Status update",
        ),
        None => tracing::info!(
            event = EVENT_JOB_UPDATE,
            job_id = %status.id,
            phase = %status.phase,
            progress = status.progress_text.as_deref().unwrap_or(""),
            "Status update",
        ),
    }
}
