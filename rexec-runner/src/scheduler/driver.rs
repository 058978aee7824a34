//! Job driver
//!
//! Owns one job's controller and serializes the two ways updates arrive:
//! the refresh timer and the push events delivered by the callback ingress.
//! Only one of them touches the controller at a time. An interrupt kills
//! the remote script; the driver keeps polling until the kill is observed.

use anyhow::{Context as AnyhowContext, Result};
use rexec_core::dto::event::ExternalEvent;
use tokio::sync::mpsc;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::controller::JobController;

/// Drives a launched job until its exit status is published
pub struct JobDriver {
    controller: JobController,
    refresh_interval: Duration,
    events: Option<mpsc::Receiver<ExternalEvent>>,
}

impl JobDriver {
    pub fn new(controller: JobController, refresh_interval: Duration) -> Self {
        Self {
            controller,
            refresh_interval,
            events: None,
        }
    }

    /// Attaches the channel push events arrive on
    pub fn with_events(mut self, events: mpsc::Receiver<ExternalEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Polls and dispatches events until the job is terminal
    ///
    /// The controller is closed before returning, on success and on error.
    pub async fn run(mut self) -> Result<JobController> {
        info!(
            "Driving task {} (refresh interval: {:?})",
            self.controller.spec().task_id,
            self.refresh_interval
        );

        let result = self.drive().await;
        self.controller.close();
        result.map(|()| self.controller)
    }

    async fn drive(&mut self) -> Result<()> {
        let mut ticker = time::interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately, the job was just launched
        ticker.tick().await;

        let mut events = self.events.take();
        let mut interrupted = false;

        while !self.controller.is_terminal() {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Refreshing task {}", self.controller.spec().task_id);
                    self.controller
                        .refresh()
                        .await
                        .context("Failed to refresh job")?;
                }
                event = next_event(&mut events) => match event {
                    Some(event) => {
                        debug!("Received event for task {}: {:?}", self.controller.spec().task_id, event);
                        self.controller
                            .external_event(event)
                            .await
                            .context("Failed to handle external event")?;
                    }
                    None => {
                        debug!("Event channel closed, relying on polling only");
                        events = None;
                    }
                },
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    warn!("Interrupted, killing task {}", self.controller.spec().task_id);
                    interrupted = true;
                    self.controller.kill().await.context("Failed to kill job")?;
                }
            }
        }

        Ok(())
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<ExternalEvent>>) -> Option<ExternalEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
