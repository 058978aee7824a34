//! Rexec Runner
//!
//! Runs one script on a remote host over ssh and reports its output and exit
//! status to the engine.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - API: Callback ingress for updates pushed by the remote host
//! - Session: ssh transport to the remote host
//! - Services: Credential issuer and output buffering
//! - Controller: Staging, launch, status reconciliation and cleanup of a job
//! - Scheduler: Refresh timer, event dispatch and update forwarding
//!
//! The runner stages the script with its control scripts, launches it in the
//! background, polls until it finishes, and exits with the script's exit code.

mod api;
mod config;
mod controller;
mod scheduler;
mod service;
mod session;
mod shell;

use anyhow::{Context, Result};
use rexec_core::domain::job::JobSpec;
use rexec_core::dto::event::ExternalEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use crate::api::CallbackState;
use crate::config::Config;
use crate::controller::JobController;
use crate::scheduler::{JobDriver, UpdateForwarder};
use crate::service::{BufferedOutputSink, CredentialIssuer, InMemoryOtpIssuer};
use crate::session::{SessionConnector, SshConnector};
use rexec_client::EngineClient;

/// Exit code used when the job's own exit code is unknown
const RUNNER_FAILURE: i32 = 1;

/// Pushed events waiting for the driver
const EVENT_QUEUE: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rexec_runner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (script_path, step_id) = match args.as_slice() {
        [script] => (script.clone(), "1".to_string()),
        [script, step] => (script.clone(), step.clone()),
        _ => anyhow::bail!("usage: rexec-runner <script-file> [step-id]"),
    };

    let script = tokio::fs::read_to_string(&script_path)
        .await
        .with_context(|| format!("Failed to read script {}", script_path))?;

    info!("Starting Rexec Runner");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Loaded configuration: remote_host={}", config.remote_host);

    let client = Arc::new(EngineClient::new(config.engine_url.clone()));
    info!("Reporting updates to engine at {}", client.base_url());

    // Initialize services
    let issuer: Arc<dyn CredentialIssuer> = Arc::new(InMemoryOtpIssuer::new());
    let sink = Arc::new(BufferedOutputSink::new());
    let connector: Arc<dyn SessionConnector> = Arc::new(SshConnector::new(config.ssh_target()));

    let task_id = Uuid::new_v4().to_string();
    info!("Running {} as task {} (step {})", script_path, task_id, step_id);

    let controller = JobController::new(
        JobSpec::new(&task_id, &step_id, &config.callback_host),
        config.controller_settings(),
        connector,
        issuer.clone(),
        sink.clone(),
    );

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
    let ingress = serve_callbacks(&config, CallbackState::new(&task_id, issuer, events_tx)).await;

    let forwarder = UpdateForwarder::new(&task_id, &step_id, sink.clone(), client)
        .spawn(config.update_send_interval);

    let result = run_job(controller, &script, &config, events_rx).await;

    if let Some(server) = ingress {
        server.abort();
    }
    forwarder.finish().await;

    let exit_code = match result {
        Ok(()) => sink.exit_code().unwrap_or(RUNNER_FAILURE),
        Err(e) => {
            error!("Task {} failed: {:#}", task_id, e);
            RUNNER_FAILURE
        }
    };

    info!("Task {} exited with code {}", task_id, exit_code);
    std::process::exit(exit_code);
}

/// Launches the script and drives it until it finishes
async fn run_job(
    mut controller: JobController,
    script: &str,
    config: &Config,
    events: mpsc::Receiver<ExternalEvent>,
) -> Result<()> {
    if let Err(e) = controller.start(script).await {
        controller.close();
        return Err(e).context("Failed to start job");
    }

    JobDriver::new(controller, config.refresh_interval)
        .with_events(events)
        .run()
        .await?;

    Ok(())
}

/// Starts the callback ingress
///
/// Without a listener the job is still driven by polling alone; the event
/// channel closes when `state` is dropped.
async fn serve_callbacks(config: &Config, state: CallbackState) -> Option<JoinHandle<()>> {
    let addr = config.callback_listen_addr;
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            warn!(
                "Failed to bind callback listener on {} ({}), relying on polling only",
                addr, e
            );
            return None;
        }
    };

    info!("Listening for callbacks on {}", addr);

    let app = api::create_router(state);
    Some(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Callback server failed: {}", e);
        }
    }))
}
