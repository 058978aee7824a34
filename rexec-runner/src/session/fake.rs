//! Scripted in-memory session connector for tests
//!
//! Records every connect, command, upload and close so tests can assert on
//! exactly what the controller sent to the "remote host".

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{CommandOutput, RemoteSession, SessionConnector, TransportError};

#[derive(Default)]
struct FakeState {
    connects: usize,
    closes: usize,
    fail_connect: bool,
    commands: Vec<String>,
    uploads: Vec<(String, String)>,
    responses: VecDeque<Result<CommandOutput, TransportError>>,
}

/// Connector whose sessions answer commands from a queue of responses
///
/// Commands without a queued response succeed with empty output.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response with the given stdout
    pub fn respond(&self, stdout: &str) {
        self.respond_with(Ok(CommandOutput {
            stdout: stdout.to_string(),
            ..Default::default()
        }));
    }

    pub fn respond_with(&self, result: Result<CommandOutput, TransportError>) {
        self.state.lock().unwrap().responses.push_back(result);
    }

    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().unwrap().fail_connect = fail;
    }

    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().commands.clone()
    }

    /// Uploaded (path, content) pairs in upload order
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn upload_count(&self, path: &str) -> usize {
        self.uploads().iter().filter(|(p, _)| p == path).count()
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    async fn connect(&self) -> Result<Box<dyn RemoteSession>, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_connect {
            return Err(TransportError::Connect {
                host: self.destination(),
                message: "connection refused".to_string(),
            });
        }
        state.connects += 1;

        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }

    fn destination(&self) -> String {
        "test@fake-host".to_string()
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn run(&mut self, command: &str) -> Result<CommandOutput, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.commands.push(command.to_string());
        state
            .responses
            .pop_front()
            .unwrap_or_else(|| Ok(CommandOutput::default()))
    }

    async fn upload(&mut self, content: &str, remote_path: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().unwrap();
        state
            .uploads
            .push((remote_path.to_string(), content.to_string()));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}
