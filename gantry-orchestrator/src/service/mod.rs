//! Service Module
//!
//! Business logic layer for the orchestrator.
//! Services sit between the HTTP handlers, the pipeline store and the
//! workflow engine.

pub mod pipeline;

pub use pipeline as pipeline_service;

use std::sync::Arc;

use crate::repository::PipelineStore;
use crate::workflow::WorkflowEngine;

/// Shared state handed to every request handler
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PipelineStore>,
    pub engine: WorkflowEngine,
}

impl AppState {
    pub fn new(store: Arc<dyn PipelineStore>, engine: WorkflowEngine) -> Self {
        Self { store, engine }
    }
}
