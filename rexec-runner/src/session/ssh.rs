//! SSH session management
//!
//! Drives the system `ssh` client:
//! - Opening a master connection per session (ControlMaster socket)
//! - Running commands over the multiplexed connection
//! - Uploading files by piping their content to `cat`
//! - Tearing the master connection down on close (or on drop)

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CommandOutput, RemoteSession, SessionConnector, TransportError};
use crate::shell::quote;

/// ssh exits with 255 when the connection itself failed
const SSH_CONNECTION_ERROR: i32 = 255;

/// Where and how to reach the remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout: Duration,
}

impl SshTarget {
    /// `user@host`
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// Options shared by every ssh invocation, destination last
    fn base_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-p".to_string(),
            self.port.to_string(),
        ];

        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }

        args
    }
}

/// Connector opening one ssh master connection per session
pub struct SshConnector {
    target: SshTarget,
}

impl SshConnector {
    pub fn new(target: SshTarget) -> Self {
        Self { target }
    }

    fn control_path() -> PathBuf {
        std::env::temp_dir().join(format!("rexec-{}.sock", Uuid::new_v4().simple()))
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, TransportError> {
        let control_path = Self::control_path();
        let destination = self.target.destination();

        debug!("Opening ssh master connection to {}", destination);

        let output = Command::new("ssh")
            .args(self.target.base_args())
            .arg("-M")
            .arg("-S")
            .arg(&control_path)
            .arg("-f")
            .arg("-N")
            .arg(&destination)
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Connect {
                host: destination,
                message: stderr.trim().to_string(),
            });
        }

        info!("Connected to {}", destination);

        Ok(Box::new(SshSession {
            target: self.target.clone(),
            control_path,
            open: true,
        }))
    }

    fn destination(&self) -> String {
        self.target.destination()
    }
}

/// One multiplexed ssh connection
pub struct SshSession {
    target: SshTarget,
    control_path: PathBuf,
    open: bool,
}

impl SshSession {
    fn command(&self) -> Command {
        let mut command = Command::new("ssh");
        command
            .args(self.target.base_args())
            .arg("-S")
            .arg(&self.control_path);
        command
    }

    /// Arguments asking the master connection to exit
    fn exit_args(&self) -> Vec<String> {
        let mut args = self.target.base_args();
        args.extend([
            "-S".to_string(),
            self.control_path.to_string_lossy().to_string(),
            "-O".to_string(),
            "exit".to_string(),
            self.target.destination(),
        ]);
        args
    }

    fn upload_command(remote_path: &str) -> String {
        let dir = match remote_path.rfind('/') {
            Some(0) => "/",
            Some(idx) => &remote_path[..idx],
            None => ".",
        };
        let path = quote(remote_path);
        format!(
            "mkdir -p {} && cat > {} && chmod 700 {}",
            quote(dir),
            path,
            path
        )
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run(&mut self, command: &str) -> Result<CommandOutput, TransportError> {
        debug!("Executing on {}: {}", self.target.destination(), command);

        let output = self
            .command()
            .arg(self.target.destination())
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        if exit_code == SSH_CONNECTION_ERROR {
            return Err(TransportError::Exec(stderr.trim().to_string()));
        }

        debug!(
            "Command finished: exit_code={}, stdout_len={}, stderr_len={}",
            exit_code,
            stdout.len(),
            stderr.len()
        );

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn upload(&mut self, content: &str, remote_path: &str) -> Result<(), TransportError> {
        debug!("Uploading {} bytes to {}", content.len(), remote_path);

        let mut child = self
            .command()
            .arg(self.target.destination())
            .arg("--")
            .arg(Self::upload_command(remote_path))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(content.as_bytes()).await?;
            // dropping stdin sends EOF to the remote cat
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(TransportError::Upload {
                path: remote_path.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let output = Command::new("ssh")
            .args(self.exit_args())
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TransportError::Close(stderr.trim().to_string()));
        }

        Ok(())
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if !self.open {
            return;
        }

        let destination = self.target.destination();
        warn!(
            "Session with {} dropped while open, stopping master connection",
            destination
        );

        let args = self.exit_args();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let status = Command::new("ssh")
                        .args(&args)
                        .stdin(Stdio::null())
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status()
                        .await;
                    log_master_exit(&destination, status);
                });
            }
            // outside a runtime, waiting here blocks no other task
            Err(_) => {
                let status = std::process::Command::new("ssh")
                    .args(&args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .status();
                log_master_exit(&destination, status);
            }
        }
    }
}

fn log_master_exit(destination: &str, status: std::io::Result<ExitStatus>) {
    match status {
        Ok(status) if status.success() => {
            debug!("Stopped master connection to {}", destination)
        }
        Ok(status) => warn!(
            "Failed to stop master connection to {}: ssh exited with {}",
            destination, status
        ),
        Err(e) => warn!("Failed to stop master connection to {}: {}", destination, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SshTarget {
        SshTarget {
            host: "example.com".to_string(),
            user: "deploy".to_string(),
            port: 2222,
            identity_file: Some(PathBuf::from("/etc/rexec/id_rsa")),
            connect_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_destination() {
        assert_eq!(target().destination(), "deploy@example.com");
    }

    #[test]
    fn test_base_args() {
        let args = target().base_args();
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-p",
                "2222",
                "-i",
                "/etc/rexec/id_rsa",
            ]
        );
    }

    #[test]
    fn test_base_args_without_identity() {
        let mut target = target();
        target.identity_file = None;
        assert!(!target.base_args().contains(&"-i".to_string()));
    }

    #[test]
    fn test_upload_command() {
        assert_eq!(
            SshSession::upload_command("/var/tmp/rexec-cmd-1/env.sh"),
            "mkdir -p /var/tmp/rexec-cmd-1 && cat > /var/tmp/rexec-cmd-1/env.sh && chmod 700 /var/tmp/rexec-cmd-1/env.sh"
        );
    }

    #[test]
    fn test_upload_command_quotes_paths() {
        assert_eq!(
            SshSession::upload_command("/tmp/job dir/script"),
            "mkdir -p '/tmp/job dir' && cat > '/tmp/job dir/script' && chmod 700 '/tmp/job dir/script'"
        );
    }

    fn open_session() -> SshSession {
        SshSession {
            target: target(),
            control_path: SshConnector::control_path(),
            open: true,
        }
    }

    #[test]
    fn test_exit_args() {
        let session = open_session();
        let args = session.exit_args();
        assert_eq!(
            &args[args.len() - 5..],
            &[
                "-S".to_string(),
                session.control_path.to_string_lossy().to_string(),
                "-O".to_string(),
                "exit".to_string(),
                "deploy@example.com".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_drop_inside_runtime_returns_immediately() {
        let started = std::time::Instant::now();
        drop(open_session());
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_drop_outside_runtime_does_not_panic() {
        // the control socket does not exist, ssh fails without connecting
        drop(open_session());
    }

    #[test]
    fn test_control_paths_are_unique() {
        assert_ne!(SshConnector::control_path(), SshConnector::control_path());
    }
}
