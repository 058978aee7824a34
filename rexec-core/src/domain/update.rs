//! Job update types
//!
//! Everything a runner reports about a job flows to the engine as a
//! [`JobUpdate`]: output chunks, the exit status, and non-fatal or fatal
//! exceptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Output stream a chunk of job output belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single update reported for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobUpdate {
    Output {
        stream: OutputStream,
        text: String,
        timestamp: DateTime<Utc>,
    },
    ExitStatus {
        exit_code: i32,
        timestamp: DateTime<Utc>,
    },
    Exception {
        message: String,
        fatal: bool,
        timestamp: DateTime<Utc>,
    },
}

impl JobUpdate {
    pub fn output(stream: OutputStream, text: impl Into<String>) -> Self {
        JobUpdate::Output {
            stream,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn exit_status(exit_code: i32) -> Self {
        JobUpdate::ExitStatus {
            exit_code,
            timestamp: Utc::now(),
        }
    }

    pub fn exception(message: impl Into<String>, fatal: bool) -> Self {
        JobUpdate::Exception {
            message: message.into(),
            fatal,
            timestamp: Utc::now(),
        }
    }

    /// Exit code carried by this update, if it is an exit status
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            JobUpdate::ExitStatus { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_names() {
        assert_eq!(OutputStream::Stdout.to_string(), "stdout");
        assert_eq!(OutputStream::Stderr.as_str(), "stderr");
    }

    #[test]
    fn test_update_serializes_tagged() {
        let update = JobUpdate::output(OutputStream::Stderr, "oops\n");
        let json = serde_json::to_value(&update).unwrap();

        assert_eq!(json["type"], "output");
        assert_eq!(json["stream"], "stderr");
        assert_eq!(json["text"], "oops\n");
    }

    #[test]
    fn test_exit_code_accessor() {
        assert_eq!(JobUpdate::exit_status(3).exit_code(), Some(3));
        assert_eq!(JobUpdate::exception("boom", false).exit_code(), None);
    }
}
