//! Output sink service
//!
//! Collects what a job reports (output chunks, the exit status, exceptions)
//! as [`JobUpdate`]s. The buffer is drained periodically and forwarded to
//! the engine.

use rexec_core::domain::update::{JobUpdate, OutputStream};
use std::error::Error;
use std::sync::{Mutex, PoisonError};
use tracing::{error, warn};

/// Downstream consumer of a job's updates
pub trait OutputSink: Send + Sync {
    /// Publishes a chunk of job output
    fn publish_output(&self, text: &str, stream: OutputStream);

    /// Publishes the job's exit status. Called at most once per job.
    fn publish_exit_status(&self, exit_code: i32);

    /// Publishes an exception raised while driving the job
    ///
    /// # Arguments
    /// * `message` - What the runner was doing
    /// * `error` - The underlying error
    /// * `fatal` - Whether the job cannot continue
    fn publish_exception(&self, message: &str, error: &dyn Error, fatal: bool);
}

/// In-memory implementation of OutputSink
#[derive(Default)]
pub struct BufferedOutputSink {
    buffer: Mutex<Vec<JobUpdate>>,
    exit_code: Mutex<Option<i32>>,
}

impl BufferedOutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains all buffered updates
    ///
    /// Returns all buffered updates in publication order and clears the buffer.
    pub fn drain(&self) -> Vec<JobUpdate> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.drain(..).collect()
    }

    /// Exit status published so far, kept after the buffer is drained
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Puts updates that could not be delivered back in front of the buffer
    pub fn requeue(&self, updates: Vec<JobUpdate>) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.splice(0..0, updates);
    }

    fn push(&self, update: JobUpdate) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.push(update);
    }
}

impl OutputSink for BufferedOutputSink {
    fn publish_output(&self, text: &str, stream: OutputStream) {
        self.push(JobUpdate::output(stream, text));
    }

    fn publish_exit_status(&self, exit_code: i32) {
        *self.exit_code.lock().unwrap_or_else(PoisonError::into_inner) = Some(exit_code);
        self.push(JobUpdate::exit_status(exit_code));
    }

    fn publish_exception(&self, message: &str, error: &dyn Error, fatal: bool) {
        let full_message = format!("{}: {}", message, error);
        if fatal {
            error!("{}", full_message);
        } else {
            warn!("{}", full_message);
        }
        self.push(JobUpdate::exception(full_message, fatal));
    }
}
