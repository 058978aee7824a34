//! Task update endpoints

use crate::EngineClient;
use crate::error::Result;
use rexec_core::domain::update::JobUpdate;
use serde::Serialize;

#[derive(Serialize)]
struct UpdateBatch<'a> {
    step_id: &'a str,
    updates: &'a [JobUpdate],
}

impl EngineClient {
    /// Send a batch of job updates for a task
    ///
    /// Empty batches are not sent.
    ///
    /// # Arguments
    /// * `task_id` - The task these updates belong to
    /// * `step_id` - The step within the task
    /// * `updates` - Updates in the order they were produced
    pub async fn send_updates(
        &self,
        task_id: &str,
        step_id: &str,
        updates: &[JobUpdate],
    ) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }

        let url = self.task_url(task_id, "update");
        tracing::debug!("Sending {} update(s) to {}", updates.len(), url);

        let response = self
            .client
            .post(&url)
            .json(&UpdateBatch { step_id, updates })
            .send()
            .await?;

        self.handle_empty_response(response).await
    }

    fn task_url(&self, task_id: &str, action: &str) -> String {
        format!("{}/api/tasks/{}/{}", self.base_url, task_id, action)
    }
}
