//! `tradedesk-watch` -- follow backend jobs from the terminal.
//!
//! Attaches to existing analysis or backtest jobs (or submits a new one),
//! logs every status update, and prints the result JSON on stdout once the
//! job completes. Ctrl-C cancels tracking.
//!
//! # Environment variables
//!
//! | Variable                         | Required | Default                 | Description                         |
//! |----------------------------------|----------|-------------------------|-------------------------------------|
//! | `TRADEDESK_API_URL`              | no       | `http://localhost:8000` | Backend base URL                    |
//! | `TRADEDESK_API_TOKEN`            | no       | --                      | Bearer token                        |
//! | `TRADEDESK_REQUEST_TIMEOUT_SECS` | no       | `30`                    | Bound on each backend call          |
//! | `TRADEDESK_POLL_INTERVAL_SECS`   | no       | `3`                     | Seconds between status polls        |
//! | `TRADEDESK_MAX_POLL_FAILURES`    | no       | `10`                    | Failed polls before giving up (0 = never) |
//! | `TRADEDESK_BACKOFF_MAX_SECS`     | no       | `30`                    | Cap on the retry delay              |
//! | `JOB_KIND`                       | no       | `analysis`              | `analysis` or `backtest`            |
//! | `JOB_ID`                         | no*      | --                      | Job to watch; arguments take precedence |
//! | `SUBMIT_REQUEST`                 | no*      | --                      | JSON body of a job to submit first  |
//!
//! \* One of `JOB_ID`, positional job ids, or `SUBMIT_REQUEST` is required.

use std::sync::Arc;

use tradedesk_client::{Session, TradeDeskApi};
use tradedesk_core::{JobHandle, JobKind};
use tradedesk_tracker::{JobMonitor, JobOutcome, TrackerConfig};
use tradedesk_watch::{watch_jobs, WatchError, WatchTarget};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradedesk_watch=info,tradedesk_tracker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Watch failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), WatchError> {
    let session = Session::from_env()?;
    let config = TrackerConfig::from_env()?;
    let target = WatchTarget::from_env(std::env::args().skip(1))?;

    tracing::info!(
        api_url = %session.base_url(),
        authenticated = session.is_authenticated(),
        kind = %target.kind,
        poll_interval_secs = config.poll_interval.as_secs(),
        "Starting tradedesk-watch",
    );

    let api = Arc::new(TradeDeskApi::new(session)?);

    let handles = match &target.submit {
        Some(request) => vec![submit(&api, target.kind, request).await?],
        None => target.handles.clone(),
    };

    let monitor = JobMonitor::for_api(api, config);
    let summary = watch_jobs(&monitor, target.kind, handles, interrupted()).await?;

    for (handle, outcome) in &summary.outcomes {
        match outcome {
            JobOutcome::Success(_) => tracing::info!(job_id = %handle, "Job completed"),
            JobOutcome::Error(err) => {
                tracing::error!(job_id = %handle, reason = %err, "Job did not complete")
            }
        }
    }
    for handle in &summary.cancelled {
        tracing::warn!(job_id = %handle, "Tracking cancelled");
    }
    for handle in &summary.lost {
        tracing::error!(job_id = %handle, "Outcome lost");
    }

    if let Some(results) = summary.results_json() {
        match serde_json::to_string_pretty(&results) {
            Ok(text) => println!("{text}"),
            Err(e) => tracing::error!(error = %e, "Failed to render result"),
        }
    }

    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn submit(
    api: &TradeDeskApi,
    kind: JobKind,
    request: &serde_json::Value,
) -> Result<JobHandle, WatchError> {
    let handle = match kind {
        JobKind::Analysis => api.submit_analysis(request).await?,
        JobKind::Backtest => api.submit_backtest(request).await?,
    };
    Ok(handle)
}

/// Resolves on Ctrl-C. Never resolves if the signal cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}
