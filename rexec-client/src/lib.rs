//! Rexec Engine Client
//!
//! A small, type-safe HTTP client the runner uses to report job updates
//! (output chunks, exit status, exceptions) to the orchestration engine.
//!
//! # Example
//!
//! ```no_run
//! use rexec_client::EngineClient;
//! use rexec_core::domain::update::{JobUpdate, OutputStream};
//!
//! #[tokio::main]
//! async fn main() -> rexec_client::Result<()> {
//!     let client = EngineClient::new("http://localhost:8080");
//!
//!     let updates = vec![JobUpdate::output(OutputStream::Stdout, "hello\n")];
//!     client.send_updates("task-1", "step-1", &updates).await?;
//!     Ok(())
//! }
//! ```

pub mod error;
mod updates;

pub use error::{ClientError, Result};

use reqwest::Client;

/// HTTP client for the engine's task update API
#[derive(Debug, Clone)]
pub struct EngineClient {
    /// Base URL of the engine (e.g., "http://localhost:8080")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl EngineClient {
    /// Create a new engine client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the engine API (e.g., "http://localhost:8080")
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new engine client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the engine
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check the status code of a response that carries no content
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = EngineClient::new("http://localhost:8080");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = EngineClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn test_client_with_custom_client() {
        let http_client = Client::new();
        let client = EngineClient::with_client("http://localhost:8080", http_client);
        assert_eq!(client.base_url(), "http://localhost:8080");
    }
}
