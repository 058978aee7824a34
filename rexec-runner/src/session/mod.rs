//! Remote session layer
//!
//! The controller talks to the remote host only through these traits: a
//! [`SessionConnector`] opens a transient [`RemoteSession`], which runs
//! commands and uploads files until it is closed. Every operation that opens
//! a session closes it before returning, whatever the outcome.

mod ssh;

#[cfg(test)]
pub mod fake;

pub use ssh::{SshConnector, SshTarget};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors raised by the transport to the remote host
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {host}: {message}")]
    Connect { host: String, message: String },

    #[error("failed to run remote command: {0}")]
    Exec(String),

    #[error("failed to upload {path}: {message}")]
    Upload { path: String, message: String },

    #[error("failed to close session: {0}")]
    Close(String),

    #[error("ssh process error: {0}")]
    Io(#[from] std::io::Error),
}

/// Captured result of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// An open connection to the remote host
#[async_trait]
pub trait RemoteSession: Send {
    /// Runs a command through the remote shell and waits for it to finish
    async fn run(&mut self, command: &str) -> Result<CommandOutput, TransportError>;

    /// Writes `content` to `remote_path`, creating parent directories
    ///
    /// The file is made executable and readable by its owner only.
    async fn upload(&mut self, content: &str, remote_path: &str) -> Result<(), TransportError>;

    /// Closes the connection
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens sessions to one remote host
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, TransportError>;

    /// Human-readable destination, used in log messages
    fn destination(&self) -> String;
}

/// Closes a session, logging instead of failing
pub async fn release(mut session: Box<dyn RemoteSession>, destination: &str) {
    debug!("Closing session with {}", destination);
    if let Err(e) = session.close().await {
        warn!("Failed to close session with {}: {}", destination, e);
    }
}
