//! Print job queue.
//!
//! A background worker takes jobs off a bounded channel and runs them one
//! at a time. Queue counters and the last outcome are kept for the status
//! endpoint.

use std::time::Duration;

use labelprinter::{Outcome, PrintJob};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::app::SharedState;
use crate::services::printer;

/// Maximum number of queued print jobs.
const QUEUE_CAPACITY: usize = 100;

/// Pause after a failed job before the next one is taken.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// A job waiting for the device.
#[derive(Debug)]
pub struct QueuedJob {
    pub id: String,
    pub job: PrintJob,
    /// Description for logging.
    pub description: String,
}

/// Result of the most recently finished job.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    /// `None` when the job was rejected before reaching the device.
    pub outcome: Option<Outcome>,
    pub message: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStatus {
    pub pending: usize,
    pub total_processed: u64,
    pub last_print_at: Option<String>,
    pub last_job: Option<JobRecord>,
}

/// Sending side of the queue plus its counters.
#[derive(Debug, Default)]
pub struct PrintQueue {
    tx: RwLock<Option<mpsc::Sender<QueuedJob>>>,
    status: RwLock<QueueStatus>,
}

/// Initialize the print queue and start the background worker.
pub async fn start_worker(state: SharedState) -> JoinHandle<()> {
    let (tx, rx) = mpsc::channel::<QueuedJob>(QUEUE_CAPACITY);
    *state.queue().tx.write().await = Some(tx);

    let handle = tokio::spawn(worker_loop(state, rx));
    tracing::info!("Print queue worker started (capacity={QUEUE_CAPACITY})");
    handle
}

/// Enqueue a print job. Returns an error if the queue is full or closed.
pub async fn enqueue(state: &SharedState, job: QueuedJob) -> Result<usize, String> {
    let queue = state.queue();
    let tx_guard = queue.tx.read().await;
    let tx = tx_guard
        .as_ref()
        .ok_or_else(|| "Print queue not running".to_string())?;

    let id = job.id.clone();
    // counted before sending so the worker never decrements first
    let mut status = queue.status.write().await;
    if let Err(e) = tx.try_send(job) {
        return Err(format!("Print queue full or closed: {e}"));
    }
    status.pending += 1;
    tracing::info!(job_id = %id, pending = status.pending, "Print job queued");
    Ok(status.pending)
}

/// Get the current queue status.
pub async fn queue_status(state: &SharedState) -> QueueStatus {
    state.queue().status.read().await.clone()
}

/// Stop accepting jobs. The worker exits once the channel drains.
pub async fn close(state: &SharedState) {
    state.queue().tx.write().await.take();
}

/// Background worker loop. Processes jobs sequentially.
async fn worker_loop(state: SharedState, mut rx: mpsc::Receiver<QueuedJob>) {
    while let Some(queued) = rx.recv().await {
        {
            let mut status = state.queue().status.write().await;
            status.pending = status.pending.saturating_sub(1);
        }

        if state.shutdown_token().is_cancelled() {
            tracing::warn!(job_id = %queued.id, "Discarding queued job during shutdown");
            continue;
        }

        tracing::info!(job_id = %queued.id, desc = %queued.description, "Print job started");
        let outcome = match printer::print(&state, &queued.id, queued.job).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_id = %queued.id, error = %e, "Print job rejected");
                record(&state, &queued.id, None, e.to_string()).await;
                continue;
            }
        };

        let failed = !outcome.is_success();
        if failed {
            tracing::error!(job_id = %queued.id, %outcome, "Print job failed");
        } else {
            tracing::info!(job_id = %queued.id, "Print job completed");
        }
        let message = outcome.to_string();
        record(&state, &queued.id, Some(outcome), message).await;

        if failed && !state.shutdown_token().is_cancelled() {
            tokio::select! {
                () = tokio::time::sleep(ERROR_BACKOFF) => {}
                () = state.shutdown_token().cancelled() => {}
            }
        }
    }

    tracing::info!("Print queue worker stopped");
}

async fn record(state: &SharedState, job_id: &str, outcome: Option<Outcome>, message: String) {
    let now = chrono::Utc::now().to_rfc3339();
    let mut status = state.queue().status.write().await;
    status.total_processed += 1;
    if outcome.as_ref().is_some_and(Outcome::is_success) {
        status.last_print_at = Some(now.clone());
    }
    tracing::debug!(job_id, total = status.total_processed, "Recorded job result");
    status.last_job = Some(JobRecord {
        job_id: job_id.to_string(),
        outcome,
        message,
        finished_at: now,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use labelprinter::{Family, JobParams, Page};

    fn queued(id: &str, pages: usize) -> QueuedJob {
        let pages = (0..pages).map(|_| Page::new(vec![0xFF; 48])).collect();
        QueuedJob {
            id: id.to_string(),
            job: PrintJob::new(JobParams::default()).with_batch(pages),
            description: format!("test {id}"),
        }
    }

    fn dry_run_state() -> SharedState {
        SharedState::new(AppConfig {
            printer_family: Family::T5080,
            dry_run_mode: true,
            ..AppConfig::default()
        })
    }

    #[tokio::test]
    async fn test_enqueue_before_start_fails() {
        let state = dry_run_state();
        let err = enqueue(&state, queued("a", 1)).await.unwrap_err();
        assert!(err.contains("not running"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_run_in_order() {
        let state = dry_run_state();
        let worker = start_worker(state.clone()).await;
        assert_eq!(enqueue(&state, queued("a", 2)).await.unwrap(), 1);
        enqueue(&state, queued("b", 1)).await.unwrap();

        close(&state).await;
        worker.await.unwrap();

        let status = queue_status(&state).await;
        assert_eq!(status.pending, 0);
        assert_eq!(status.total_processed, 2);
        let last = status.last_job.unwrap();
        assert_eq!(last.job_id, "b");
        assert!(last.outcome.unwrap().is_success());
        assert!(status.last_print_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_queue_discards_jobs() {
        let state = dry_run_state();
        let worker = start_worker(state.clone()).await;
        state.shutdown_token().cancel();
        enqueue(&state, queued("a", 1)).await.unwrap();
        close(&state).await;
        worker.await.unwrap();

        let status = queue_status(&state).await;
        assert_eq!(status.total_processed, 0);
        assert!(status.last_job.is_none());
    }
}
