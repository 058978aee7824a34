//! Update forwarder
//!
//! Periodically drains the job's buffered updates and sends them to the
//! engine. Updates that fail with a transient error are put back and retried
//! on the next tick. On shutdown whatever is still buffered is sent one last
//! time.

use rexec_client::EngineClient;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::service::BufferedOutputSink;

/// Sends a job's buffered updates to the engine
#[derive(Clone)]
pub struct UpdateForwarder {
    task_id: String,
    step_id: String,
    sink: Arc<BufferedOutputSink>,
    client: Arc<EngineClient>,
}

/// Running forwarder task
pub struct ForwarderHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl UpdateForwarder {
    pub fn new(
        task_id: impl Into<String>,
        step_id: impl Into<String>,
        sink: Arc<BufferedOutputSink>,
        client: Arc<EngineClient>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            step_id: step_id.into(),
            sink,
            client,
        }
    }

    /// Spawns a background task sending updates every `interval`
    pub fn spawn(self, interval: Duration) -> ForwarderHandle {
        let (shutdown, mut stop) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => self.send_pending().await,
                    _ = &mut stop => break,
                }
            }

            let remaining = self.sink.drain();
            if !remaining.is_empty() {
                info!(
                    "Sending {} remaining updates for task {}",
                    remaining.len(),
                    self.task_id
                );
                if let Err(e) = self
                    .client
                    .send_updates(&self.task_id, &self.step_id, &remaining)
                    .await
                {
                    warn!("Failed to send final updates: {:#}", e);
                }
            }
        });

        ForwarderHandle { shutdown, task }
    }

    async fn send_pending(&self) {
        let updates = self.sink.drain();

        if updates.is_empty() {
            debug!("No updates to send for task {}", self.task_id);
            return;
        }

        debug!("Sending {} updates for task {}", updates.len(), self.task_id);

        if let Err(e) = self
            .client
            .send_updates(&self.task_id, &self.step_id, &updates)
            .await
        {
            if e.is_transient() {
                warn!(
                    "Failed to send updates for task {}, retrying: {:#}",
                    self.task_id, e
                );
                self.sink.requeue(updates);
            } else {
                error!("Failed to send updates for task {}: {:#}", self.task_id, e);
            }
        }
    }
}

impl ForwarderHandle {
    /// Stops the task after one final send and waits for it
    pub async fn finish(self) {
        // the task may already be gone if it panicked
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("Update forwarder task failed: {}", e);
        }
    }
}
