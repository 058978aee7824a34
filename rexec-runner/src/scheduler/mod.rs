//! Scheduler layer for the runner
//!
//! This layer drives a launched job: it polls the remote host on a timer,
//! dispatches pushed events to the job's controller, and forwards the
//! collected updates to the engine until the job finishes.

pub mod driver;
pub mod forwarder;

pub use driver::JobDriver;
pub use forwarder::UpdateForwarder;
