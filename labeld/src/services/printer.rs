//! Device access: opens the configured transport and runs one job or query
//! on it.
//!
//! Every call opens a fresh transport and the session closes it when the
//! job ends. Calls are serialised on the device lock in [`SharedState`].

use std::path::PathBuf;
use std::time::Duration;

use labelprinter::{
    DeviceSim, ErrorKind, Family, HidrawTransport, JobEvent, Outcome, PrintJob, Query, Report,
    ScriptedTransport, Session, SessionOptions, Transport,
};
use tokio::sync::mpsc;

use crate::app::{ActiveJob, SharedState};

/// Snapshot of the printer settings taken when a call starts.
#[derive(Debug, Clone)]
pub struct Target {
    pub family: Family,
    pub path: PathBuf,
    pub dry_run: bool,
    pub reply_timeout: Duration,
}

impl Target {
    pub async fn current(state: &SharedState) -> Self {
        let config = state.config().await;
        Self {
            family: config.printer_family,
            path: config.hidraw_path.clone(),
            dry_run: config.dry_run_mode,
            reply_timeout: config.reply_timeout(),
        }
    }
}

enum Operation {
    Print { job_id: String, job: PrintJob },
    Query(Query),
}

/// Print `job` and wait for its outcome. The job is registered as the
/// active job so it can be stopped while it runs.
pub async fn print(
    state: &SharedState,
    job_id: &str,
    job: PrintJob,
) -> labelprinter::Result<Outcome> {
    let op = Operation::Print {
        job_id: job_id.to_string(),
        job,
    };
    let (outcome, _) = execute(state, job_id, op).await?;
    Ok(outcome)
}

/// Run a readback query.
pub async fn query(
    state: &SharedState,
    query: Query,
) -> labelprinter::Result<(Outcome, Option<Report>)> {
    execute(state, "query", Operation::Query(query)).await
}

async fn execute(
    state: &SharedState,
    label: &str,
    op: Operation,
) -> labelprinter::Result<(Outcome, Option<Report>)> {
    let target = Target::current(state).await;
    let profile = target.family.profile();
    let _device = state.device().lock().await;

    let (tx, rx) = mpsc::unbounded_channel();
    let events = tokio::spawn(log_events(label.to_string(), rx));
    let options = SessionOptions::new()
        .with_reply_timeout(target.reply_timeout)
        .with_event_channel(tx);

    let result = if target.dry_run {
        tracing::info!(family = %target.family, label, "Dry run: using simulated device");
        let transport = ScriptedTransport::simulated(DeviceSim::new(profile));
        run(state, Session::new(profile, transport, options), op).await
    } else {
        match HidrawTransport::open(&target.path).await {
            Ok(transport) => run(state, Session::new(profile, transport, options), op).await,
            Err(e) => {
                tracing::error!(path = %target.path.display(), error = %e, "Failed to open printer");
                Ok((
                    Outcome::Failure(ErrorKind::TransportUnavailable(e.to_string())),
                    None,
                ))
            }
        }
    };

    // the session owned the last event sender, so the logger drains and exits
    if let Err(e) = events.await {
        tracing::warn!(job = %label, error = %e, "Event logger task failed");
    }
    result
}

async fn run<T: Transport>(
    state: &SharedState,
    mut session: Session<T>,
    op: Operation,
) -> labelprinter::Result<(Outcome, Option<Report>)> {
    match op {
        Operation::Print { job_id, job } => {
            state
                .set_active(Some(ActiveJob {
                    id: job_id,
                    control: session.control_handle(),
                }))
                .await;
            let result = session.run(job).await;
            state.set_active(None).await;
            Ok((result?, None))
        }
        Operation::Query(query) => session.query(query).await,
    }
}

async fn log_events(label: String, mut rx: mpsc::UnboundedReceiver<JobEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            JobEvent::Advisory { fault } => {
                tracing::warn!(job = %label, %fault, "Printer advisory");
            }
            JobEvent::CommitFailed { page } => {
                tracing::warn!(job = %label, page, "Buffer commit failed, continuing");
            }
            JobEvent::PageSent { page } => tracing::debug!(job = %label, page, "Page sent"),
            JobEvent::BatchDrained => tracing::debug!(job = %label, "Batch drained"),
            JobEvent::Printed { count } => tracing::info!(job = %label, count, "Pages printed"),
            JobEvent::Report { report } => tracing::debug!(job = %label, ?report, "Readback"),
        }
    }
}
