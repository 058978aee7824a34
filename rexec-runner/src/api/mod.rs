//! Callback API
//!
//! HTTP ingress for the updates a job's remote control script pushes to
//! `$CALLBACK_HOST/tasks/{task_id}/update` and `.../done`. Accepted
//! payloads are handed to the job driver as external events.

pub mod callback;
pub mod error;

pub use callback::CallbackState;

use axum::{Router, routing::post};
use tower_http::trace::TraceLayer;

/// Create the callback router for one job
pub fn create_router(state: CallbackState) -> Router {
    Router::new()
        .route("/tasks/{task_id}/update", post(callback::receive_callback))
        .route("/tasks/{task_id}/done", post(callback::receive_callback))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
