//! Job domain types

use serde::{Deserialize, Serialize};

/// Identity of one remote script invocation
///
/// Supplied by the orchestration engine when it creates a controller and
/// immutable for the life of the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    pub task_id: String,
    pub step_id: String,
    /// Address the remote host uses to push updates back
    pub callback_host: String,
}

impl JobSpec {
    pub fn new(
        task_id: impl Into<String>,
        step_id: impl Into<String>,
        callback_host: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            step_id: step_id.into(),
            callback_host: callback_host.into(),
        }
    }
}

/// Lifecycle phase of a job as tracked by its controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    /// Controller constructed, nothing on the remote host yet
    Created,
    /// Primary script and control bundle uploaded
    Staged,
    /// Launch command dispatched, waiting for completion
    Running,
    /// Exit status published; no further status changes accepted
    Terminal,
    /// Credential revoked; the owner is expected to discard the controller
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_spec_new() {
        let spec = JobSpec::new("task-1", "step-1", "https://proxy:9090");
        assert_eq!(spec.task_id, "task-1");
        assert_eq!(spec.step_id, "step-1");
        assert_eq!(spec.callback_host, "https://proxy:9090");
    }
}
