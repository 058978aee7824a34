//! Job controller
//!
//! Drives one script on the remote host from staging to cleanup. Updates
//! reach the controller through two channels:
//! - polling: `refresh()` reconnects and runs the retrieval script
//! - push: `external_event()` receives what the remote control script posted
//!
//! Both converge on a single reconciliation routine that publishes output,
//! publishes the exit status at most once and removes the remote working
//! directory once the job is terminal.
//!
//! The controller does no internal locking; its owner serializes calls
//! (see [`crate::scheduler::JobDriver`]).

mod error;
pub mod scripts;

pub use error::ControllerError;

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use rexec_core::domain::job::{JobPhase, JobSpec};
use rexec_core::domain::status::{RetrievedFrame, StatusCheck, strip_status_line};
use rexec_core::domain::update::OutputStream;
use rexec_core::dto::event::ExternalEvent;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::UserMethod;
use crate::service::{CredentialIssuer, OutputSink};
use crate::session::{CommandOutput, RemoteSession, SessionConnector, release};
use crate::shell::quote;
use scripts::{
    CONTROL_FILE, CONTROL_SCRIPT, ENV_FILE, RETRIEVE_FILE, RETRIEVE_SCRIPT, RemoteLayout,
    StagedBundle,
};

/// Accepts padded and unpadded input; whitespace is stripped beforehand
const PUSHED_OUTPUT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Deployment settings shared by every controller in the process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub remote_working_dir: String,
    pub cleanup_working_dirs: bool,
    pub user_method: UserMethod,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            remote_working_dir: "/var/tmp".to_string(),
            cleanup_working_dirs: true,
            user_method: UserMethod::Direct,
        }
    }
}

pub struct JobController {
    spec: JobSpec,
    settings: ControllerSettings,
    layout: RemoteLayout,
    connector: Arc<dyn SessionConnector>,
    issuer: Arc<dyn CredentialIssuer>,
    sink: Arc<dyn OutputSink>,
    credential: Option<String>,
    bundle: Option<StagedBundle>,
    phase: JobPhase,
    terminal: bool,
    cleanup_done: bool,
}

impl JobController {
    /// Creates a controller and issues the job's credential
    ///
    /// # Arguments
    /// * `spec` - Job identity supplied by the engine
    /// * `settings` - Working directory, cleanup and privilege settings
    /// * `connector` - Opens sessions to the remote host
    /// * `issuer` - Process-wide credential issuer
    /// * `sink` - Receives output, exit status and exceptions
    pub fn new(
        spec: JobSpec,
        settings: ControllerSettings,
        connector: Arc<dyn SessionConnector>,
        issuer: Arc<dyn CredentialIssuer>,
        sink: Arc<dyn OutputSink>,
    ) -> Self {
        let credential = issuer.generate(&spec.task_id);
        let layout = RemoteLayout::new(&settings.remote_working_dir, &spec.task_id);

        Self {
            spec,
            settings,
            layout,
            connector,
            issuer,
            sink,
            credential: Some(credential),
            bundle: None,
            phase: JobPhase::Created,
            terminal: false,
            cleanup_done: false,
        }
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    /// The job's credential, `None` once the controller is closed
    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    /// Whether the exit status has been published
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Creates the working directory, uploads the primary script and stages
    /// the control bundle, all over one session
    pub async fn prepare_start(&mut self, script: &str) -> Result<(), ControllerError> {
        self.ensure_open()?;

        let mut session = self.connector.connect().await?;
        let result = self.stage(session.as_mut(), script).await;
        release(session, &self.connector.destination()).await;
        result
    }

    async fn stage(
        &mut self,
        session: &mut dyn RemoteSession,
        script: &str,
    ) -> Result<(), ControllerError> {
        let mkdir = format!("mkdir -p {}", quote(self.layout.base_dir()));
        let output = session.run(&mkdir).await?;
        if !output.success() {
            return Err(ControllerError::remote_command(
                &mkdir,
                output.exit_code,
                &output.stderr,
            ));
        }

        session.upload(script, &self.layout.script()).await?;
        self.stage_bundle(session).await
    }

    /// Uploads the control bundle unless it is already on the remote host
    pub async fn upload_bundle(&mut self) -> Result<(), ControllerError> {
        self.ensure_open()?;
        if self.bundle.is_some() {
            return Ok(());
        }

        let mut session = self.connector.connect().await?;
        let result = self.stage_bundle(session.as_mut()).await;
        release(session, &self.connector.destination()).await;
        result
    }

    async fn stage_bundle(&mut self, session: &mut dyn RemoteSession) -> Result<(), ControllerError> {
        if self.bundle.is_some() {
            return Ok(());
        }

        let credential = self
            .credential
            .as_deref()
            .ok_or_else(|| ControllerError::Closed(self.spec.task_id.clone()))?;
        let env = scripts::env_script(&self.spec, credential);

        session.upload(&env, &self.layout.file(ENV_FILE)).await?;

        let control_script = self.layout.file(CONTROL_FILE);
        session.upload(CONTROL_SCRIPT, &control_script).await?;

        let retrieval_script = self.layout.file(RETRIEVE_FILE);
        session.upload(RETRIEVE_SCRIPT, &retrieval_script).await?;

        debug!(
            "Staged control scripts for task {} in {}",
            self.spec.task_id,
            self.layout.base_dir()
        );

        self.bundle = Some(StagedBundle {
            control_script,
            retrieval_script,
        });
        if self.phase == JobPhase::Created {
            self.phase = JobPhase::Staged;
        }
        Ok(())
    }

    /// Command line that launches the primary script in the background
    pub fn initialization_script(&self) -> Result<String, ControllerError> {
        let bundle = self.staged()?;
        Ok(scripts::initialization_script(
            &self.layout,
            bundle,
            &self.settings.user_method,
        ))
    }

    /// Stages everything and launches the primary script
    ///
    /// A failure here means the job never started; it is published as a
    /// fatal exception before being returned.
    pub async fn start(&mut self, script: &str) -> Result<(), ControllerError> {
        let result = self.launch(script).await;
        if let Err(e) = &result {
            self.sink
                .publish_exception("Failed to launch script", e, true);
        }
        result
    }

    async fn launch(&mut self, script: &str) -> Result<(), ControllerError> {
        self.prepare_start(script).await?;

        let command = self.initialization_script()?;
        let output = self.trigger(&command).await?;
        if !output.success() {
            return Err(ControllerError::remote_command(
                "initialization script",
                output.exit_code,
                &output.stderr,
            ));
        }

        self.phase = JobPhase::Running;
        info!(
            "Launched task {} on {}",
            self.spec.task_id,
            self.connector.destination()
        );
        Ok(())
    }

    /// Runs a command over a fresh session and returns its result
    pub async fn trigger(&self, command: &str) -> Result<CommandOutput, ControllerError> {
        self.ensure_open()?;

        let mut session = self.connector.connect().await?;
        let result = session.run(command).await;
        release(session, &self.connector.destination()).await;
        Ok(result?)
    }

    /// Polls the remote host once
    ///
    /// Transport failures are logged and count as "nothing new"; only
    /// sequencing errors are returned. A terminal job is not polled again.
    pub async fn refresh(&mut self) -> Result<(), ControllerError> {
        self.ensure_open()?;
        if self.terminal {
            return Ok(());
        }

        let command = format!(
            "{}{}",
            self.settings.user_method.cli_command_prefix(),
            quote(&self.staged()?.retrieval_script)
        );

        let output = match self.trigger(&command).await {
            Ok(output) => output,
            Err(e) => {
                info!("Polling task {} failed: {}", self.spec.task_id, e);
                CommandOutput::default()
            }
        };

        self.process_retrieved_data(&output.stdout, &output.stderr)
            .await;
        Ok(())
    }

    /// Interprets retrieval output: status line first, then new stdout
    ///
    /// Empty stdout is a no-op. A first line that is not a status line is
    /// dropped and the job is considered still running. A `DONE` line with
    /// an unusable exit code still ends the job.
    pub async fn process_retrieved_data(&mut self, stdout: &str, stderr: &str) {
        let Some((frame, check)) = RetrievedFrame::from_retrieval(stdout, stderr) else {
            return;
        };

        match check {
            StatusCheck::Valid => {}
            StatusCheck::MalformedExitCode => warn!(
                "Task {} reported a malformed exit code, using {}",
                self.spec.task_id,
                frame.exit_code.unwrap_or_default()
            ),
            StatusCheck::Missing => warn!(
                "Retrieval output for task {} does not start with a status line, assuming it is still running",
                self.spec.task_id
            ),
        }

        self.reconcile(frame).await;
    }

    async fn reconcile(&mut self, frame: RetrievedFrame) {
        if self.terminal {
            debug!(
                "Ignoring update for task {}, exit status already published",
                self.spec.task_id
            );
            return;
        }

        if !frame.stdout.is_empty() {
            self.sink.publish_output(&frame.stdout, OutputStream::Stdout);
        }
        if !frame.stderr.is_empty() {
            self.sink.publish_output(&frame.stderr, OutputStream::Stderr);
        }

        if let Some(exit_code) = frame.exit_code {
            self.terminal = true;
            self.phase = JobPhase::Terminal;
            info!(
                "Task {} finished with exit code {}",
                self.spec.task_id, exit_code
            );
            self.sink.publish_exit_status(exit_code);
            self.cleanup().await;
        }
    }

    /// Handles an update pushed by the remote control script
    pub async fn external_event(&mut self, event: ExternalEvent) -> Result<(), ControllerError> {
        self.ensure_open()?;

        match event {
            ExternalEvent::PollRequest => self.refresh().await,
            ExternalEvent::PushData { output, exit_code } => {
                let text = output
                    .map(|encoded| self.decode_pushed_output(&encoded))
                    .unwrap_or_default();

                self.reconcile(RetrievedFrame {
                    exit_code,
                    stdout: strip_status_line(&text).to_string(),
                    stderr: String::new(),
                })
                .await;
                Ok(())
            }
        }
    }

    fn decode_pushed_output(&self, encoded: &str) -> String {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();

        match PUSHED_OUTPUT.decode(compact) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                self.sink
                    .publish_exception("Unable to decode pushed output", &e, false);
                String::new()
            }
        }
    }

    /// Terminates the process tree of the launched script
    ///
    /// Failures are reported to the output sink as non-fatal exceptions.
    pub async fn kill(&mut self) -> Result<(), ControllerError> {
        self.ensure_open()?;
        self.staged()?;

        let command = format!(
            "{}pkill -P \"$(cat {})\"",
            self.settings.user_method.cli_command_prefix(),
            quote(&self.layout.pid())
        );
        if self
            .ensure_remote_command(&command, "Unable to kill the running script")
            .await
        {
            info!("Killed the script of task {}", self.spec.task_id);
        }
        Ok(())
    }

    /// Removes the remote working directory, at most once per job
    pub async fn cleanup(&mut self) {
        if self.cleanup_done {
            return;
        }
        self.cleanup_done = true;

        if !self.settings.cleanup_working_dirs {
            debug!(
                "Keeping working directory {} of task {}",
                self.layout.base_dir(),
                self.spec.task_id
            );
            return;
        }

        let base_dir = self.layout.base_dir();
        let command = format!(
            "{}rm -rf {}",
            self.settings.user_method.cli_command_prefix(),
            quote(base_dir)
        );
        let failure = format!("Unable to remove working directory {base_dir} on remote system");

        if self.ensure_remote_command(&command, &failure).await {
            info!("Removed working directory {}", base_dir);
        }
    }

    /// Runs a command, reporting transport errors and nonzero exit codes as
    /// non-fatal exceptions. Returns whether the command succeeded.
    async fn ensure_remote_command(&self, command: &str, failure: &str) -> bool {
        let error = match self.trigger(command).await {
            Ok(output) if output.success() => return true,
            Ok(output) => {
                ControllerError::remote_command(command, output.exit_code, &output.stderr)
            }
            Err(e) => e,
        };

        self.sink.publish_exception(failure, &error, false);
        false
    }

    /// Revokes the credential. Further operations fail with `Closed`.
    pub fn close(&mut self) {
        if let Some(credential) = self.credential.take() {
            self.issuer.revoke(&self.spec.task_id, &credential);
            debug!("Closed controller for task {}", self.spec.task_id);
        }
        self.phase = JobPhase::Closed;
    }

    fn staged(&self) -> Result<&StagedBundle, ControllerError> {
        self.bundle
            .as_ref()
            .ok_or_else(|| ControllerError::NotStaged(self.spec.task_id.clone()))
    }

    fn ensure_open(&self) -> Result<(), ControllerError> {
        if self.phase == JobPhase::Closed {
            return Err(ControllerError::Closed(self.spec.task_id.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{BufferedOutputSink, InMemoryOtpIssuer};
    use crate::session::TransportError;
    use crate::session::fake::FakeConnector;
    use base64::engine::general_purpose::STANDARD;
    use rexec_core::domain::update::JobUpdate;

    const BASE_DIR: &str = "/var/tmp/rexec-cmd-task-1";
    const RETRIEVE: &str = "/var/tmp/rexec-cmd-task-1/retrieve.sh";

    struct Harness {
        connector: FakeConnector,
        issuer: Arc<InMemoryOtpIssuer>,
        sink: Arc<BufferedOutputSink>,
        controller: JobController,
    }

    fn harness_with(settings: ControllerSettings) -> Harness {
        let connector = FakeConnector::new();
        let issuer = Arc::new(InMemoryOtpIssuer::new());
        let sink = Arc::new(BufferedOutputSink::new());
        let controller = JobController::new(
            JobSpec::new("task-1", "7", "https://proxy.example.com:9090"),
            settings,
            Arc::new(connector.clone()),
            issuer.clone(),
            sink.clone(),
        );

        Harness {
            connector,
            issuer,
            sink,
            controller,
        }
    }

    fn harness() -> Harness {
        harness_with(ControllerSettings::default())
    }

    async fn staged() -> Harness {
        let mut h = harness();
        h.controller.upload_bundle().await.unwrap();
        h
    }

    fn exit_statuses(updates: &[JobUpdate]) -> Vec<i32> {
        updates.iter().filter_map(JobUpdate::exit_code).collect()
    }

    fn outputs(updates: &[JobUpdate], wanted: OutputStream) -> Vec<String> {
        updates
            .iter()
            .filter_map(|u| match u {
                JobUpdate::Output { stream, text, .. } if *stream == wanted => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn exceptions(updates: &[JobUpdate]) -> Vec<(String, bool)> {
        updates
            .iter()
            .filter_map(|u| match u {
                JobUpdate::Exception { message, fatal, .. } => Some((message.clone(), *fatal)),
                _ => None,
            })
            .collect()
    }

    fn push(output: &str, exit_code: Option<i32>) -> ExternalEvent {
        ExternalEvent::PushData {
            output: Some(STANDARD.encode(output)),
            exit_code,
        }
    }

    #[tokio::test]
    async fn test_exit_status_published_once_across_channels() {
        let mut h = staged().await;

        h.connector.respond("DONE 0\n");
        h.controller.refresh().await.unwrap();
        h.controller
            .external_event(push("DONE 0\nlate\n", Some(0)))
            .await
            .unwrap();
        h.connector.respond("DONE 0\n");
        h.controller.refresh().await.unwrap();

        let updates = h.sink.drain();
        assert_eq!(exit_statuses(&updates), vec![0]);
        assert!(outputs(&updates, OutputStream::Stdout).is_empty());

        let removals = h
            .connector
            .commands()
            .iter()
            .filter(|c| c.starts_with("rm -rf"))
            .count();
        assert_eq!(removals, 1);
    }

    #[tokio::test]
    async fn test_push_then_poll_publishes_once() {
        let mut h = staged().await;

        h.controller
            .external_event(push("DONE 2\n", Some(2)))
            .await
            .unwrap();
        h.connector.respond("DONE 2\n");
        h.controller.refresh().await.unwrap();

        assert_eq!(exit_statuses(&h.sink.drain()), vec![2]);
        assert!(h.controller.is_terminal());
    }

    #[tokio::test]
    async fn test_done_with_code_and_output() {
        let mut h = staged().await;
        h.connector.respond("DONE 3\nhello\nworld\n");

        h.controller.refresh().await.unwrap();

        let updates = h.sink.drain();
        assert_eq!(outputs(&updates, OutputStream::Stdout), vec!["hello\nworld\n"]);
        assert_eq!(exit_statuses(&updates), vec![3]);
        assert_eq!(h.controller.phase(), JobPhase::Terminal);
        assert_eq!(
            h.connector.commands(),
            vec![RETRIEVE.to_string(), format!("rm -rf {}", BASE_DIR)]
        );
    }

    #[tokio::test]
    async fn test_bare_done_means_success() {
        let mut h = staged().await;
        h.connector.respond("DONE\n");

        h.controller.refresh().await.unwrap();

        assert_eq!(exit_statuses(&h.sink.drain()), vec![0]);
    }

    #[tokio::test]
    async fn test_running_without_output() {
        let mut h = staged().await;
        h.connector.respond("RUNNING\n");

        h.controller.refresh().await.unwrap();

        assert!(h.sink.drain().is_empty());
        assert!(!h.controller.is_terminal());
    }

    #[tokio::test]
    async fn test_running_with_output() {
        let mut h = staged().await;
        h.connector.respond("RUNNING\nstep 1\n");

        h.controller.refresh().await.unwrap();

        let updates = h.sink.drain();
        assert_eq!(outputs(&updates, OutputStream::Stdout), vec!["step 1\n"]);
        assert!(exit_statuses(&updates).is_empty());
    }

    #[tokio::test]
    async fn test_empty_output_is_noop() {
        let mut h = staged().await;

        h.controller.process_retrieved_data("", "some noise").await;
        h.controller.refresh().await.unwrap();

        assert!(h.sink.drain().is_empty());
        assert!(!h.controller.is_terminal());
        assert_eq!(h.connector.commands(), vec![RETRIEVE.to_string()]);
    }

    #[tokio::test]
    async fn test_malformed_exit_code_finishes_job() {
        for (line, expected) in [
            ("DONE 4294967296\nout\n", i32::MAX),
            ("DONE abc\nout\n", 0),
            ("DONE -1\nout\n", -1),
        ] {
            let mut h = staged().await;
            h.connector.respond(line);

            h.controller.refresh().await.unwrap();

            let updates = h.sink.drain();
            assert_eq!(outputs(&updates, OutputStream::Stdout), vec!["out\n"], "{}", line);
            assert_eq!(exit_statuses(&updates), vec![expected], "{}", line);
            assert!(h.controller.is_terminal(), "{}", line);
        }
    }

    #[tokio::test]
    async fn test_missing_status_line_keeps_running() {
        let mut h = staged().await;

        h.controller
            .process_retrieved_data("garbage\nout\n", "")
            .await;

        let updates = h.sink.drain();
        assert_eq!(outputs(&updates, OutputStream::Stdout), vec!["out\n"]);
        assert!(exit_statuses(&updates).is_empty());
        assert!(!h.controller.is_terminal());
    }

    #[tokio::test]
    async fn test_stderr_published() {
        let mut h = staged().await;
        h.connector.respond_with(Ok(CommandOutput {
            stdout: "RUNNING\n".to_string(),
            stderr: "warning: disk almost full\n".to_string(),
            exit_code: 0,
        }));

        h.controller.refresh().await.unwrap();

        let updates = h.sink.drain();
        assert_eq!(
            outputs(&updates, OutputStream::Stderr),
            vec!["warning: disk almost full\n"]
        );
    }

    #[tokio::test]
    async fn test_whitespace_stderr_published() {
        let mut h = staged().await;
        h.connector.respond_with(Ok(CommandOutput {
            stdout: "RUNNING\n".to_string(),
            stderr: "\n".to_string(),
            exit_code: 0,
        }));

        h.controller.refresh().await.unwrap();

        assert_eq!(outputs(&h.sink.drain(), OutputStream::Stderr), vec!["\n"]);
    }

    #[tokio::test]
    async fn test_session_released_after_successful_poll() {
        let mut h = staged().await;
        h.connector.respond("RUNNING\n");

        h.controller.refresh().await.unwrap();

        assert_eq!(h.connector.connects(), 2);
        assert_eq!(h.connector.closes(), 2);
    }

    #[tokio::test]
    async fn test_session_released_after_failed_poll() {
        let mut h = staged().await;
        h.connector
            .respond_with(Err(TransportError::Exec("connection reset".to_string())));

        h.controller.refresh().await.unwrap();

        assert_eq!(h.connector.connects(), h.connector.closes());
        assert!(h.sink.drain().is_empty());
        assert!(!h.controller.is_terminal());
    }

    #[tokio::test]
    async fn test_connect_failure_during_poll_is_swallowed() {
        let mut h = staged().await;
        h.connector.fail_connect(true);

        h.controller.refresh().await.unwrap();

        assert_eq!(h.connector.connects(), 1);
        assert_eq!(h.connector.closes(), 1);
        assert!(h.sink.drain().is_empty());
    }

    #[tokio::test]
    async fn test_close_revokes_credential() {
        let mut h = harness();
        let credential = h.controller.credential().unwrap().to_string();
        assert!(h.issuer.authenticate("task-1", &credential));

        h.controller.close();
        assert!(!h.issuer.authenticate("task-1", &credential));
        assert_eq!(h.controller.credential(), None);

        h.controller.close();
        assert_eq!(h.controller.phase(), JobPhase::Closed);
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let mut h = staged().await;
        h.controller.close();

        assert!(matches!(
            h.controller.refresh().await,
            Err(ControllerError::Closed(_))
        ));
        assert!(matches!(
            h.controller.external_event(ExternalEvent::PollRequest).await,
            Err(ControllerError::Closed(_))
        ));
        assert_eq!(h.connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_bundle_staged_once() {
        let mut h = harness();

        h.controller.upload_bundle().await.unwrap();
        h.controller.upload_bundle().await.unwrap();

        for file in [ENV_FILE, CONTROL_FILE, RETRIEVE_FILE] {
            let path = format!("{}/{}", BASE_DIR, file);
            assert_eq!(h.connector.upload_count(&path), 1, "{}", path);
        }
        assert_eq!(h.connector.connects(), 1);
        assert_eq!(h.controller.phase(), JobPhase::Staged);
    }

    #[tokio::test]
    async fn test_prepare_start_stages_script_and_bundle() {
        let mut h = harness();

        h.controller.prepare_start("#!/bin/sh\necho hi\n").await.unwrap();
        h.controller.upload_bundle().await.unwrap();

        assert_eq!(h.connector.commands(), vec![format!("mkdir -p {}", BASE_DIR)]);
        let uploads = h.connector.uploads();
        let paths: Vec<&str> = uploads.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/var/tmp/rexec-cmd-task-1/script",
                "/var/tmp/rexec-cmd-task-1/env.sh",
                "/var/tmp/rexec-cmd-task-1/control.sh",
                "/var/tmp/rexec-cmd-task-1/retrieve.sh",
            ]
        );
        assert_eq!(uploads[0].1, "#!/bin/sh\necho hi\n");

        let credential = h.controller.credential().unwrap();
        assert!(uploads[1].1.contains(&format!("OTP={}\n", credential)));
        assert_eq!(h.connector.connects(), 1);
        assert_eq!(h.connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_push_decodes_output() {
        let mut h = staged().await;

        h.controller
            .external_event(push("DONE 1\nfoo\n", Some(1)))
            .await
            .unwrap();

        let updates = h.sink.drain();
        assert_eq!(outputs(&updates, OutputStream::Stdout), vec!["foo\n"]);
        assert_eq!(exit_statuses(&updates), vec![1]);
        assert!(h.controller.is_terminal());
    }

    #[tokio::test]
    async fn test_push_without_exit_code_keeps_running() {
        let mut h = staged().await;

        h.controller
            .external_event(push("RUNNING\nprogress\n", None))
            .await
            .unwrap();

        let updates = h.sink.drain();
        assert_eq!(outputs(&updates, OutputStream::Stdout), vec!["progress\n"]);
        assert!(exit_statuses(&updates).is_empty());
        assert!(h.connector.commands().is_empty());
    }

    #[tokio::test]
    async fn test_push_tolerates_wrapped_base64() {
        let mut h = staged().await;
        let encoded = STANDARD.encode("RUNNING\nline one\nline two\n");
        let (head, tail) = encoded.split_at(12);

        h.controller
            .external_event(ExternalEvent::PushData {
                output: Some(format!("{}\n{}\n", head, tail)),
                exit_code: None,
            })
            .await
            .unwrap();

        assert_eq!(
            outputs(&h.sink.drain(), OutputStream::Stdout),
            vec!["line one\nline two\n"]
        );
    }

    #[tokio::test]
    async fn test_push_with_undecodable_output() {
        let mut h = staged().await;

        h.controller
            .external_event(ExternalEvent::PushData {
                output: Some("%%% not base64 %%%".to_string()),
                exit_code: Some(4),
            })
            .await
            .unwrap();

        let updates = h.sink.drain();
        let errors = exceptions(&updates);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].0.starts_with("Unable to decode pushed output"));
        assert!(!errors[0].1);
        assert_eq!(exit_statuses(&updates), vec![4]);
    }

    #[tokio::test]
    async fn test_poll_request_polls_once() {
        let mut h = staged().await;

        h.controller
            .external_event(ExternalEvent::PollRequest)
            .await
            .unwrap();

        assert_eq!(h.connector.commands(), vec![RETRIEVE.to_string()]);
        assert_eq!(h.connector.connects(), 2);
        assert!(h.sink.drain().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_before_staging() {
        let mut h = harness();

        let result = h.controller.refresh().await;

        assert!(matches!(result, Err(ControllerError::NotStaged(_))));
        assert!(matches!(
            h.controller.initialization_script(),
            Err(ControllerError::NotStaged(_))
        ));
        assert_eq!(h.connector.connects(), 0);
    }

    #[tokio::test]
    async fn test_start_launches_script() {
        let mut h = harness();

        h.controller.start("echo hi\n").await.unwrap();

        let commands = h.connector.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1], h.controller.initialization_script().unwrap());
        assert_eq!(h.controller.phase(), JobPhase::Running);
        assert_eq!(h.connector.connects(), h.connector.closes());
    }

    #[tokio::test]
    async fn test_start_failure_is_fatal() {
        let mut h = harness();
        h.connector.fail_connect(true);

        let result = h.controller.start("echo hi\n").await;

        assert!(matches!(result, Err(ControllerError::Transport(_))));
        let errors = exceptions(&h.sink.drain());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].0.starts_with("Failed to launch script"));
        assert!(errors[0].1);
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_reported() {
        let mut h = staged().await;
        h.connector.respond("DONE 0\n");
        h.connector.respond_with(Ok(CommandOutput {
            stdout: String::new(),
            stderr: "Permission denied".to_string(),
            exit_code: 1,
        }));

        h.controller.refresh().await.unwrap();

        let updates = h.sink.drain();
        assert_eq!(exit_statuses(&updates), vec![0]);
        let errors = exceptions(&updates);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].0.starts_with(&format!(
            "Unable to remove working directory {} on remote system",
            BASE_DIR
        )));
        assert!(errors[0].0.contains("exited with code 1"));
        assert!(!errors[0].1);
    }

    #[tokio::test]
    async fn test_cleanup_disabled() {
        let mut h = harness_with(ControllerSettings {
            cleanup_working_dirs: false,
            ..Default::default()
        });
        h.controller.upload_bundle().await.unwrap();
        h.connector.respond("DONE 0\n");

        h.controller.refresh().await.unwrap();

        assert_eq!(h.connector.commands(), vec![RETRIEVE.to_string()]);
    }

    #[tokio::test]
    async fn test_cleanup_runs_once() {
        let mut h = harness();

        h.controller.cleanup().await;
        h.controller.cleanup().await;

        assert_eq!(h.connector.commands(), vec![format!("rm -rf {}", BASE_DIR)]);
    }

    #[tokio::test]
    async fn test_kill() {
        let mut h = staged().await;

        h.controller.kill().await.unwrap();

        assert_eq!(
            h.connector.commands(),
            vec![format!("pkill -P \"$(cat {}/pid)\"", BASE_DIR)]
        );
        assert!(h.sink.drain().is_empty());
    }

    #[tokio::test]
    async fn test_kill_failure_is_not_fatal() {
        let mut h = staged().await;
        h.connector.fail_connect(true);

        h.controller.kill().await.unwrap();

        let errors = exceptions(&h.sink.drain());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].0.starts_with("Unable to kill the running script"));
        assert!(!errors[0].1);
        assert!(!h.controller.is_terminal());
    }

    #[tokio::test]
    async fn test_user_method_prefixes_commands() {
        let mut h = harness_with(ControllerSettings {
            user_method: UserMethod::Sudo {
                user: "app".to_string(),
            },
            ..Default::default()
        });
        h.controller.upload_bundle().await.unwrap();
        h.connector.respond("DONE 0\n");

        h.controller.refresh().await.unwrap();

        assert_eq!(
            h.connector.commands(),
            vec![
                format!("sudo -n -u app {}", RETRIEVE),
                format!("sudo -n -u app rm -rf {}", BASE_DIR),
            ]
        );
    }
}
