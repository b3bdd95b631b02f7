use std::sync::Arc;

use labelprinter::Control;
use tokio::sync::{Mutex, RwLock, RwLockReadGuard, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::services::print_queue::PrintQueue;

/// Application state shared by the HTTP handlers, the queue worker and the CLI.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<SharedStateInner>,
}

struct SharedStateInner {
    config: RwLock<AppConfig>,
    queue: PrintQueue,
    /// Held for the duration of any device exchange.
    device: Mutex<()>,
    /// Control sender of the job currently on the device.
    active: Mutex<Option<ActiveJob>>,
    shutdown_token: CancellationToken,
}

/// Handle on the running job.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub id: String,
    pub control: mpsc::Sender<Control>,
}

impl SharedState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            inner: Arc::new(SharedStateInner {
                config: RwLock::new(config),
                queue: PrintQueue::default(),
                device: Mutex::new(()),
                active: Mutex::new(None),
                shutdown_token: CancellationToken::new(),
            }),
        }
    }

    pub fn server_port(&self) -> u16 {
        self.inner
            .config
            .try_read()
            .map(|c| c.server_port)
            .unwrap_or(8080)
    }

    /// Get a read lock on the current config.
    pub async fn config(&self) -> RwLockReadGuard<'_, AppConfig> {
        self.inner.config.read().await
    }

    pub fn queue(&self) -> &PrintQueue {
        &self.inner.queue
    }

    pub fn device(&self) -> &Mutex<()> {
        &self.inner.device
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown_token
    }

    pub async fn set_active(&self, job: Option<ActiveJob>) {
        *self.inner.active.lock().await = job;
    }

    pub async fn active_job_id(&self) -> Option<String> {
        self.inner.active.lock().await.as_ref().map(|job| job.id.clone())
    }

    /// Ask the running job to stop. Returns its id, or `None` when the
    /// device is idle.
    pub async fn stop_active(&self) -> Option<String> {
        let active = self.inner.active.lock().await.clone()?;
        if active.control.send(Control::Stop).await.is_err() {
            tracing::warn!(job_id = %active.id, "Job finished before the stop request arrived");
            return None;
        }
        tracing::info!(job_id = %active.id, "Stop requested");
        Some(active.id)
    }
}
