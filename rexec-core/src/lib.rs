//! Rexec Core
//!
//! Core types shared by the remote job runner and its clients.
//!
//! This crate contains:
//! - Domain types: job identity, output streams, job updates and the
//!   retrieval status line contract
//! - DTOs: the callback payload pushed by remote hosts

pub mod domain;
pub mod dto;
