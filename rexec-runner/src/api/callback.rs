//! Callback endpoints
//!
//! The control script authenticates with HTTP basic auth, `TASK_ID:OTP`,
//! using the credential staged in its `env.sh`.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rexec_core::dto::event::ExternalEvent;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::error::{ApiError, ApiResult};
use crate::service::CredentialIssuer;

/// Shared state of the callback router
#[derive(Clone)]
pub struct CallbackState {
    task_id: String,
    issuer: Arc<dyn CredentialIssuer>,
    events: mpsc::Sender<ExternalEvent>,
}

impl CallbackState {
    pub fn new(
        task_id: impl Into<String>,
        issuer: Arc<dyn CredentialIssuer>,
        events: mpsc::Sender<ExternalEvent>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            issuer,
            events,
        }
    }
}

/// Receive an update or completion notice from the remote host
pub async fn receive_callback(
    State(state): State<CallbackState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<StatusCode> {
    if task_id != state.task_id {
        return Err(ApiError::NotFound(format!("Task {} not found", task_id)));
    }

    authorize(&state, &task_id, &headers)?;

    let event = ExternalEvent::from_json(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid callback payload: {}", e)))?;

    debug!("Accepted callback for task {}", task_id);

    state
        .events
        .send(event)
        .await
        .map_err(|_| ApiError::Gone(format!("Task {} is no longer running", task_id)))?;

    Ok(StatusCode::NO_CONTENT)
}

fn authorize(state: &CallbackState, task_id: &str, headers: &HeaderMap) -> ApiResult<()> {
    let Some((user, token)) = basic_credentials(headers) else {
        return Err(ApiError::Unauthorized(
            "Missing or malformed credentials".to_string(),
        ));
    };

    if user != task_id || !state.issuer.authenticate(task_id, &token) {
        warn!("Rejected callback for task {} with invalid credentials", task_id);
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    Ok(())
}

fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, token) = decoded.split_once(':')?;
    Some((user.to_string(), token.to_string()))
}
