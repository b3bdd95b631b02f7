use std::time::Duration;

use tokio::task::JoinHandle;

use crate::app::SharedState;
use crate::services::print_queue;

/// How long the active job gets to run its stop sequence.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

/// Cancel background loops, close the queue and stop the running job, then
/// wait for the worker to finish.
pub async fn graceful_shutdown(state: &SharedState, worker: Option<JoinHandle<()>>) {
    tracing::info!("Shutdown sequence started");

    state.shutdown_token().cancel();
    tracing::info!("Shutdown: server and background loops cancelled");

    print_queue::close(state).await;
    tracing::info!("Shutdown: print queue closed");

    if let Some(job_id) = state.stop_active().await {
        tracing::info!(%job_id, "Shutdown: stop sent to active job");
    }

    if let Some(worker) = worker {
        match tokio::time::timeout(DRAIN_TIMEOUT, worker).await {
            Ok(Ok(())) => tracing::info!("Shutdown: print worker finished"),
            Ok(Err(e)) => tracing::error!("Shutdown: print worker panicked: {e}"),
            Err(_) => tracing::warn!("Shutdown: print worker still busy, giving up"),
        }
    }
    tracing::info!("Shutdown sequence completed");
}
