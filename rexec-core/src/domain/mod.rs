//! Core domain types
//!
//! These types describe a remote job as seen by the runner (which drives it)
//! and by the engine (which consumes its updates).

pub mod job;
pub mod status;
pub mod update;
