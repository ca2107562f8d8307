//! Data Transfer Objects for the orchestrator API
//!
//! Lightweight request/response shapes exchanged between the CLI, the client
//! crate and the orchestrator service.

pub mod pipeline;
pub mod signal;
