//! Error types for the job controller

use thiserror::Error;

use crate::session::TransportError;

/// Errors returned by controller operations
///
/// Polling, kill and cleanup never return transport or remote command
/// failures; those are logged or reported to the output sink instead.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// A command needing the control scripts was issued before staging
    #[error("control scripts for task {0} have not been staged")]
    NotStaged(String),

    #[error("controller for task {0} is closed")]
    Closed(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("remote command `{command}` exited with code {exit_code}: {stderr}")]
    RemoteCommand {
        command: String,
        exit_code: i32,
        stderr: String,
    },
}

impl ControllerError {
    pub fn remote_command(command: &str, exit_code: i32, stderr: &str) -> Self {
        Self::RemoteCommand {
            command: command.to_string(),
            exit_code,
            stderr: stderr.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_command_message() {
        let err = ControllerError::remote_command("rm -rf /tmp/x", 1, "permission denied\n");
        assert_eq!(
            err.to_string(),
            "remote command `rm -rf /tmp/x` exited with code 1: permission denied"
        );
    }

    #[test]
    fn test_transport_is_transparent() {
        let err: ControllerError = TransportError::Exec("broken pipe".to_string()).into();
        assert_eq!(err.to_string(), "failed to run remote command: broken pipe");
    }

    #[test]
    fn test_sequencing_messages() {
        assert_eq!(
            ControllerError::NotStaged("1".to_string()).to_string(),
            "control scripts for task 1 have not been staged"
        );
        assert_eq!(
            ControllerError::Closed("1".to_string()).to_string(),
            "controller for task 1 is closed"
        );
    }
}
