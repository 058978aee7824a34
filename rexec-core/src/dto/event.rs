//! Callback event DTOs
//!
//! The remote host pushes a JSON payload whenever the control script reports
//! progress. The ingress decodes it and turns it into an [`ExternalEvent`]
//! before handing it to the job's controller.

use serde::{Deserialize, Serialize};

/// Payload posted by the remote control script
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackPayload {
    /// Whether the job's script took over lifecycle control
    #[serde(default)]
    pub manual_mode: Option<bool>,
    /// Base-64 encoded output, status line included
    #[serde(default)]
    pub output: Option<String>,
    /// Present once the job finished
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub step_id: Option<String>,
}

/// Event delivered to a job controller through the push channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalEvent {
    /// Manual mode: the payload carries the data itself
    PushData {
        /// Base-64 encoded output
        output: Option<String>,
        exit_code: Option<i32>,
    },
    /// Automatic mode: something changed on the host, go poll it
    PollRequest,
}

impl ExternalEvent {
    /// Decodes a raw JSON callback body
    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        let payload: CallbackPayload = serde_json::from_str(body)?;
        Ok(payload.into())
    }
}

impl From<CallbackPayload> for ExternalEvent {
    fn from(payload: CallbackPayload) -> Self {
        if payload.manual_mode.unwrap_or(false) {
            ExternalEvent::PushData {
                output: payload.output,
                exit_code: payload.exit_code,
            }
        } else {
            ExternalEvent::PollRequest
        }
    }
}
