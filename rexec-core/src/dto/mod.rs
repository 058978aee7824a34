//! Data Transfer Objects for inter-service communication
//!
//! DTOs decoded at the boundary between the callback ingress and the runner.

pub mod event;
