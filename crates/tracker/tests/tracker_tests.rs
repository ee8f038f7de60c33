//! Integration tests for `JobTracker` sessions.
//!
//! Every test drives a session against a scripted backend. Waits between
//! polls go through a `RecordingClock`, so the tests run instantly and can
//! assert the exact poll cadence.

mod common;

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use assert_matches::assert_matches;
use common::{handle, sample_result, secs, wait_until, Recorder, ResultStep, ScriptedBackend, Step};
use tradedesk_core::{CoreError, JobHandle, JobPhase, JobStatus};
use tradedesk_tracker::{
    FetchError, JobObserver, JobOutcome, JobTracker, RecordingClock, SessionState, SettleError,
    TrackerConfig, TrackingSession,
};

use JobPhase::{Completed, Failed, Pending, Running};

fn tracker(backend: &Arc<ScriptedBackend>, clock: &Arc<RecordingClock>) -> JobTracker {
    tracker_with(backend, clock, TrackerConfig::default())
}

fn tracker_with(
    backend: &Arc<ScriptedBackend>,
    clock: &Arc<RecordingClock>,
    config: TrackerConfig,
) -> JobTracker {
    JobTracker::new(backend.clone(), config).with_clock(clock.clone())
}

// ---------------------------------------------------------------------------
// Test: pending -> running -> running -> completed settles with the result
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_job_delivers_every_update_then_result() {
    let backend = ScriptedBackend::with_phases([Pending, Running, Running, Completed]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    let session = tracker(&backend, &clock).start_observer(handle("an-1"), recorder.clone());
    session.join().await;

    assert_eq!(recorder.phases(), vec![Pending, Running, Running, Completed]);
    assert_eq!(recorder.outcome(), JobOutcome::Success(sample_result()));
    assert_eq!(session.state(), SessionState::Completed);

    assert_eq!(backend.status_calls(), 4);
    assert_eq!(backend.result_calls(), 1);
    assert_eq!(clock.waits(), vec![secs(3), secs(3), secs(3)]);
}

// ---------------------------------------------------------------------------
// Test: pending -> failed settles with the backend's error text
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_job_settles_with_error_text_and_skips_result() {
    let backend = ScriptedBackend::new([Step::Status(Pending), Step::Failed("out of memory")]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    let session = tracker(&backend, &clock).start_observer(handle("an-2"), recorder.clone());
    session.join().await;

    assert_eq!(recorder.phases(), vec![Pending, Failed]);
    let outcome = recorder.outcome();
    assert_eq!(outcome.reason().as_deref(), Some("out of memory"));
    assert_matches!(outcome, JobOutcome::Error(SettleError::JobFailed(_)));
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(backend.result_calls(), 0);
}

#[tokio::test]
async fn failed_job_without_error_text_gets_generic_reason() {
    let backend = ScriptedBackend::with_phases([Failed]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    tracker(&backend, &clock)
        .start_observer(handle("an-3"), recorder.clone())
        .join()
        .await;

    assert_eq!(recorder.outcome().reason().as_deref(), Some("job failed"));
}

// ---------------------------------------------------------------------------
// Test: completed but result fetch fails -> distinct error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn result_fetch_failure_is_distinct_from_job_failure() {
    let backend = ScriptedBackend::with_phases([Running, Completed]);
    backend.set_result(ResultStep::Err(FetchError::Transient("connection reset".into())));
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    let session = tracker(&backend, &clock).start_observer(handle("bt-1"), recorder.clone());
    session.join().await;

    let outcome = recorder.outcome();
    assert_eq!(outcome.reason().as_deref(), Some("result fetch failed"));
    assert_matches!(
        outcome,
        JobOutcome::Error(SettleError::ResultFetchFailed { cause }) if cause.contains("connection reset")
    );
    assert_eq!(session.state(), SessionState::Failed);
    assert_eq!(backend.result_calls(), 1);
}

// ---------------------------------------------------------------------------
// Test: cancel before the first poll resolves -> no callbacks at all
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_before_first_poll_resolves_silences_session() {
    let backend = ScriptedBackend::new([Step::Gated(Completed)]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    let session = tracker(&backend, &clock).start_observer(handle("an-4"), recorder.clone());
    wait_until(|| backend.status_calls() == 1).await;

    session.cancel();
    backend.release();
    session.join().await;

    assert!(recorder.updates().is_empty());
    assert!(recorder.outcomes().is_empty());
    assert_eq!(session.state(), SessionState::Cancelled);
    assert_eq!(backend.result_calls(), 0);
}

#[tokio::test]
async fn cancel_before_task_starts_never_polls() {
    let backend = ScriptedBackend::with_phases([Completed]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    let session = tracker(&backend, &clock).start_observer(handle("an-5"), recorder.clone());
    assert_eq!(session.state(), SessionState::Idle);
    session.cancel();
    session.join().await;

    assert_eq!(backend.status_calls(), 0);
    assert!(recorder.updates().is_empty());
    assert_eq!(session.state(), SessionState::Cancelled);
}

// ---------------------------------------------------------------------------
// Test: transient failures are retried silently with backoff
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failures_are_retried_without_callbacks() {
    let flaky = || Step::Error(FetchError::Transient("connection refused".into()));
    let backend = ScriptedBackend::new([flaky(), flaky(), Step::Status(Completed)]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    tracker(&backend, &clock)
        .start_observer(handle("an-6"), recorder.clone())
        .join()
        .await;

    assert_eq!(recorder.phases(), vec![Completed]);
    assert!(recorder.outcome().is_success());
    assert_eq!(clock.waits(), vec![secs(3), secs(6)]);
}

#[tokio::test]
async fn backoff_doubles_up_to_cap() {
    let flaky = || Step::Error(FetchError::Transient("503".into()));
    let mut steps: Vec<Step> = (0..6).map(|_| flaky()).collect();
    steps.push(Step::Status(Completed));
    let backend = ScriptedBackend::new(steps);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();
    let config = TrackerConfig::default().with_max_consecutive_failures(0);

    tracker_with(&backend, &clock, config)
        .start_observer(handle("an-7"), recorder.clone())
        .join()
        .await;

    assert!(recorder.outcome().is_success());
    assert_eq!(
        clock.waits(),
        vec![secs(3), secs(6), secs(12), secs(24), secs(30), secs(30)]
    );
}

#[tokio::test]
async fn successful_poll_resets_backoff() {
    let flaky = || Step::Error(FetchError::Transient("timeout".into()));
    let backend = ScriptedBackend::new([
        flaky(),
        flaky(),
        Step::Status(Running),
        flaky(),
        Step::Status(Completed),
    ]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    tracker(&backend, &clock)
        .start_observer(handle("an-8"), recorder.clone())
        .join()
        .await;

    assert_eq!(clock.waits(), vec![secs(3), secs(6), secs(3), secs(3)]);
    assert_eq!(recorder.phases(), vec![Running, Completed]);
}

#[tokio::test]
async fn consecutive_failure_ceiling_abandons_polling() {
    let flaky = || Step::Error(FetchError::Transient("connection refused".into()));
    let backend = ScriptedBackend::new([flaky(), flaky(), flaky(), Step::Status(Completed)]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();
    let config = TrackerConfig::default().with_max_consecutive_failures(3);

    let session =
        tracker_with(&backend, &clock, config).start_observer(handle("an-9"), recorder.clone());
    session.join().await;

    let outcome = recorder.outcome();
    assert_matches!(
        outcome,
        JobOutcome::Error(SettleError::PollingAbandoned { attempts: 3 })
    );
    assert_eq!(
        outcome.reason().as_deref(),
        Some("polling abandoned after 3 consecutive failures")
    );
    assert!(recorder.updates().is_empty());
    assert_eq!(backend.status_calls(), 3);
    assert_eq!(backend.remaining(), 1);
    assert_eq!(clock.waits(), vec![secs(3), secs(6)]);
    assert_eq!(session.state(), SessionState::Failed);
}

// ---------------------------------------------------------------------------
// Test: non-transient errors settle immediately
// ---------------------------------------------------------------------------

#[tokio::test]
async fn access_denied_settles_without_retry() {
    let backend = ScriptedBackend::new([
        Step::Error(FetchError::AccessDenied("token expired".into())),
        Step::Status(Completed),
    ]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    tracker(&backend, &clock)
        .start_observer(handle("an-10"), recorder.clone())
        .join()
        .await;

    let outcome = recorder.outcome();
    assert_eq!(outcome.reason().as_deref(), Some("access denied: token expired"));
    assert_matches!(
        outcome,
        JobOutcome::Error(SettleError::Rejected(FetchError::AccessDenied(_)))
    );
    assert_eq!(backend.status_calls(), 1);
    assert!(clock.waits().is_empty());
}

#[tokio::test]
async fn unknown_job_settles_as_not_found() {
    let backend = ScriptedBackend::new([Step::Error(FetchError::NotFound("no such job".into()))]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    tracker(&backend, &clock)
        .start_observer(handle("missing"), recorder.clone())
        .join()
        .await;

    assert_matches!(
        recorder.outcome(),
        JobOutcome::Error(SettleError::Rejected(FetchError::NotFound(_)))
    );
}

// ---------------------------------------------------------------------------
// Test: request timeouts count as transient failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn hung_status_requests_time_out_and_abandon() {
    let backend = ScriptedBackend::new([]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();
    let config = TrackerConfig::default()
        .with_request_timeout(Duration::from_secs(1))
        .with_max_consecutive_failures(2);

    tracker_with(&backend, &clock, config)
        .start_observer(handle("an-11"), recorder.clone())
        .join()
        .await;

    assert_matches!(
        recorder.outcome(),
        JobOutcome::Error(SettleError::PollingAbandoned { attempts: 2 })
    );
    assert_eq!(backend.status_calls(), 2);
    assert_eq!(clock.waits(), vec![secs(3)]);
}

#[tokio::test(start_paused = true)]
async fn hung_result_request_is_a_result_fetch_failure() {
    let backend = ScriptedBackend::with_phases([Completed]);
    backend.set_result(ResultStep::Hang);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();
    let config = TrackerConfig::default().with_request_timeout(Duration::from_secs(1));

    tracker_with(&backend, &clock, config)
        .start_observer(handle("an-12"), recorder.clone())
        .join()
        .await;

    assert_matches!(
        recorder.outcome(),
        JobOutcome::Error(SettleError::ResultFetchFailed { .. })
    );
}

#[tokio::test(start_paused = true)]
async fn default_clock_waits_poll_interval_between_polls() {
    let backend = ScriptedBackend::with_phases([Running, Completed]);
    let recorder = Recorder::new();
    let start = tokio::time::Instant::now();

    JobTracker::new(backend.clone(), TrackerConfig::default())
        .start_observer(handle("an-13"), recorder.clone())
        .join()
        .await;

    assert!(recorder.outcome().is_success());
    assert!(start.elapsed() >= secs(3));
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn settles_at_most_once_over_long_sessions() {
    let mut phases = vec![Pending; 5];
    phases.extend(std::iter::repeat(Running).take(40));
    phases.push(Completed);
    let backend = ScriptedBackend::with_phases(phases);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    let session = tracker(&backend, &clock).start_observer(handle("an-14"), recorder.clone());
    session.join().await;

    assert_eq!(recorder.updates().len(), 46);
    assert_eq!(recorder.outcomes().len(), 1);
}

#[tokio::test]
async fn result_is_only_fetched_after_completed() {
    let backend = ScriptedBackend::with_phases([Pending, Running, Running, Completed]);
    let clock = Arc::new(RecordingClock::new());

    tracker(&backend, &clock)
        .start_observer(handle("an-15"), Recorder::new())
        .join()
        .await;

    assert_eq!(backend.phases_at_result(), vec![Some(Completed)]);

    let backend = ScriptedBackend::with_phases([Pending, Running, Failed]);
    tracker(&backend, &clock)
        .start_observer(handle("an-16"), Recorder::new())
        .join()
        .await;

    assert!(backend.phases_at_result().is_empty());
}

#[tokio::test]
async fn in_flight_response_after_cancel_is_discarded() {
    let backend = ScriptedBackend::new([Step::Status(Running), Step::Gated(Completed)]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    let session = tracker(&backend, &clock).start_observer(handle("an-17"), recorder.clone());
    wait_until(|| backend.status_calls() == 2).await;

    session.cancel();
    backend.release();
    session.join().await;

    assert_eq!(recorder.phases(), vec![Running]);
    assert!(recorder.outcomes().is_empty());
    assert_eq!(backend.result_calls(), 0);
}

#[tokio::test]
async fn polling_stops_at_first_terminal_phase() {
    let backend = ScriptedBackend::with_phases([Running, Completed, Running, Failed]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    tracker(&backend, &clock)
        .start_observer(handle("an-18"), recorder.clone())
        .join()
        .await;

    assert_eq!(recorder.phases(), vec![Running, Completed]);
    assert!(recorder.outcome().is_success());
    assert_eq!(backend.remaining(), 2);
}

#[tokio::test]
async fn cancel_is_idempotent_and_silent() {
    let backend = ScriptedBackend::with_phases([Running, Completed]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();

    let session = tracker(&backend, &clock).start_observer(handle("an-19"), recorder.clone());
    session.join().await;

    session.cancel();
    session.cancel();

    assert_eq!(recorder.updates().len(), 2);
    assert_eq!(recorder.outcomes().len(), 1);
    assert_eq!(session.state(), SessionState::Completed);

    let backend = ScriptedBackend::new([Step::Gated(Running)]);
    let recorder = Recorder::new();
    let session = tracker(&backend, &clock).start_observer(handle("an-20"), recorder.clone());
    session.cancel();
    session.cancel();
    session.join().await;
    session.cancel();

    assert!(recorder.updates().is_empty());
    assert!(recorder.outcomes().is_empty());
    assert_eq!(session.state(), SessionState::Cancelled);
}

// ---------------------------------------------------------------------------
// Test: cancelling from inside a callback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_from_update_callback_stops_session() {
    let backend = ScriptedBackend::new([
        Step::Gated(Running),
        Step::Status(Running),
        Step::Status(Completed),
    ]);
    let clock = Arc::new(RecordingClock::new());
    let recorder = Recorder::new();
    let slot: Arc<OnceLock<Arc<TrackingSession>>> = Arc::new(OnceLock::new());

    let on_update = {
        let recorder = recorder.clone();
        let slot = slot.clone();
        move |status: &JobStatus| {
            recorder.on_update(status);
            if let Some(session) = slot.get() {
                session.cancel();
            }
        }
    };
    let on_settle = {
        let recorder = recorder.clone();
        move |outcome: JobOutcome| recorder.on_settle(outcome)
    };

    let session = Arc::new(tracker(&backend, &clock).start(handle("an-21"), on_update, on_settle));
    assert!(slot.set(session.clone()).is_ok());
    backend.release();
    session.join().await;

    assert_eq!(recorder.phases(), vec![Running]);
    assert!(recorder.outcomes().is_empty());
    assert_eq!(backend.status_calls(), 1);
    assert_eq!(session.state(), SessionState::Cancelled);
}

// ---------------------------------------------------------------------------
// Test: closures and session bookkeeping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn closure_callbacks_receive_snapshots_and_outcome() {
    let backend = ScriptedBackend::with_phases([Pending, Completed]);
    let clock = Arc::new(RecordingClock::new());
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let session = {
        let updates = seen.clone();
        let settles = seen.clone();
        tracker(&backend, &clock).start(
            handle("an-22"),
            move |status| updates.lock().unwrap().push(status.phase.to_string()),
            move |outcome| {
                let label = if outcome.is_success() { "success" } else { "error" };
                settles.lock().unwrap().push(label.to_string());
            },
        )
    };
    session.join().await;

    assert_eq!(
        *seen.lock().unwrap(),
        vec!["pending".to_string(), "completed".to_string(), "success".to_string()]
    );
}

#[tokio::test]
async fn sessions_have_distinct_ids() {
    let backend = ScriptedBackend::new([]);
    let clock = Arc::new(RecordingClock::new());
    let tracker = tracker(&backend, &clock);

    let a = tracker.start_observer(handle("a"), Recorder::new());
    let b = tracker.start_observer(handle("b"), Recorder::new());

    assert_ne!(a.id(), b.id());
    assert_eq!(a.handle().as_str(), "a");

    a.cancel();
    b.cancel();
    a.join().await;
    b.join().await;
}

#[test]
fn blank_handles_are_rejected_before_tracking() {
    assert_matches!(JobHandle::new(""), Err(CoreError::Validation(_)));
    assert_matches!(JobHandle::new("   "), Err(CoreError::Validation(_)));
}
