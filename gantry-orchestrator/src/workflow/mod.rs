//! Workflow Module
//!
//! Drives pipelines through their state machine. Every decision is appended to
//! the event log before the driver acts on it, so a pipeline can be picked up
//! from its log after any restart.

pub mod approval;
pub mod coordinator;
pub mod deployment;
pub mod retry;
pub mod rollback;
pub mod sequencer;
pub mod signals;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use coordinator::{WorkflowEngine, WorkflowError, WorkflowSettings};
