#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tradedesk_core::{JobHandle, JobPhase, JobResult, JobStatus};
use tradedesk_tracker::{FetchError, JobBackend, JobObserver, JobOutcome};

/// One scripted answer to `fetch_status`.
#[derive(Debug, Clone)]
pub enum Step {
    Status(JobPhase),
    Failed(&'static str),
    Error(FetchError),
    /// Waits for [`ScriptedBackend::release`] before answering.
    Gated(JobPhase),
    /// Never answers.
    Hang,
}

/// The answer to `fetch_result`.
#[derive(Debug, Clone)]
pub enum ResultStep {
    Ok(JobResult),
    Err(FetchError),
    Hang,
}

/// A [`JobBackend`] that replays a fixed script and counts its calls.
///
/// Once the script runs out every further status call hangs.
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    result: Mutex<ResultStep>,
    gate: Notify,
    status_calls: AtomicUsize,
    result_calls: AtomicUsize,
    last_phase: Mutex<Option<JobPhase>>,
    phases_at_result: Mutex<Vec<Option<JobPhase>>>,
}

impl ScriptedBackend {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into_iter().collect()),
            result: Mutex::new(ResultStep::Ok(sample_result())),
            gate: Notify::new(),
            status_calls: AtomicUsize::new(0),
            result_calls: AtomicUsize::new(0),
            last_phase: Mutex::new(None),
            phases_at_result: Mutex::new(Vec::new()),
        })
    }

    pub fn with_phases(phases: impl IntoIterator<Item = JobPhase>) -> Arc<Self> {
        Self::new(phases.into_iter().map(Step::Status))
    }

    pub fn set_result(&self, result: ResultStep) {
        *self.result.lock().unwrap() = result;
    }

    /// Let one gated status call answer.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> usize {
        self.result_calls.load(Ordering::SeqCst)
    }

    /// Script entries never consumed.
    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap().len()
    }

    /// Last phase handed out before each `fetch_result` call.
    pub fn phases_at_result(&self) -> Vec<Option<JobPhase>> {
        self.phases_at_result.lock().unwrap().clone()
    }

    fn answer(&self, handle: &JobHandle, phase: JobPhase) -> JobStatus {
        *self.last_phase.lock().unwrap() = Some(phase);
        JobStatus::new(handle.clone(), phase)
    }
}

#[async_trait]
impl JobBackend for ScriptedBackend {
    async fn fetch_status(&self, handle: &JobHandle) -> Result<JobStatus, FetchError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(Step::Hang);
        match step {
            Step::Status(phase) => Ok(self.answer(handle, phase)),
            Step::Failed(reason) => {
                Ok(self.answer(handle, JobPhase::Failed).with_error(reason))
            }
            Step::Error(err) => Err(err),
            Step::Gated(phase) => {
                self.gate.notified().await;
                Ok(self.answer(handle, phase))
            }
            Step::Hang => std::future::pending().await,
        }
    }

    async fn fetch_result(&self, _handle: &JobHandle) -> Result<JobResult, FetchError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        let last = *self.last_phase.lock().unwrap();
        self.phases_at_result.lock().unwrap().push(last);
        let result = self.result.lock().unwrap().clone();
        match result {
            ResultStep::Ok(result) => Ok(result),
            ResultStep::Err(err) => Err(err),
            ResultStep::Hang => std::future::pending().await,
        }
    }
}

/// Observer that keeps everything it is told.
#[derive(Default)]
pub struct Recorder {
    updates: Mutex<Vec<JobStatus>>,
    outcomes: Mutex<Vec<JobOutcome>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn updates(&self) -> Vec<JobStatus> {
        self.updates.lock().unwrap().clone()
    }

    pub fn phases(&self) -> Vec<JobPhase> {
        self.updates().iter().map(|s| s.phase).collect()
    }

    pub fn outcomes(&self) -> Vec<JobOutcome> {
        self.outcomes.lock().unwrap().clone()
    }

    /// The single outcome, failing the test if there were zero or several.
    pub fn outcome(&self) -> JobOutcome {
        let outcomes = self.outcomes();
        assert_eq!(outcomes.len(), 1, "expected exactly one outcome: {outcomes:?}");
        outcomes.into_iter().next().unwrap()
    }
}

impl JobObserver for Recorder {
    fn on_update(&self, status: &JobStatus) {
        self.updates.lock().unwrap().push(status.clone());
    }

    fn on_settle(&self, outcome: JobOutcome) {
        self.outcomes.lock().unwrap().push(outcome);
    }
}

pub fn handle(raw: &str) -> JobHandle {
    JobHandle::new(raw).unwrap()
}

pub fn sample_result() -> JobResult {
    JobResult::new(serde_json::json!({
        "ticker": "AAPL",
        "recommendation": "hold",
        "confidence": 0.72,
    }))
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Spin the scheduler until `cond` holds, failing after five seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached in time");
}
