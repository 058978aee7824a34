//! Service layer
//!
//! Services hold the process-wide and per-job state the controller relies
//! on: the one-time credential table and the output sink that collects job
//! updates until they are forwarded to the engine.
//!
//! All services are trait-based to enable testing and dependency injection.

mod credentials;
mod output;

// Re-export traits
pub use credentials::CredentialIssuer;
pub use output::OutputSink;

// Re-export implementations
pub use credentials::InMemoryOtpIssuer;
pub use output::BufferedOutputSink;
