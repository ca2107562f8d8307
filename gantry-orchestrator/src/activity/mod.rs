//! Activity Module
//!
//! The external calls a pipeline makes. The workflow only depends on the
//! `Activities` trait; `ShellActivities` is the production implementation that
//! drives docker and kubectl.

pub mod shell;

use async_trait::async_trait;
use gantry_core::domain::activity::{
    ApprovalNotice, BuildRequest, DecisionNotice, DeployRequest, PublishRequest, RollbackReport,
    RollbackRequest, TestRequest,
};
use gantry_core::domain::deployment::DeploymentRecord;
use gantry_core::domain::phase::PhaseResult;
use thiserror::Error;

pub use shell::ShellActivities;

/// Failure of a single external call attempt
#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}: {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    #[error("{0}")]
    Failed(String),
}

/// Service trait for the work behind each pipeline phase
///
/// Every method may fail transiently; the caller owns retries. A test run
/// that executed but reported failures is returned as `Ok` with
/// `success == false`.
#[async_trait]
pub trait Activities: Send + Sync {
    async fn build(&self, req: &BuildRequest) -> Result<PhaseResult, ActivityError>;

    async fn test(&self, req: &TestRequest) -> Result<PhaseResult, ActivityError>;

    async fn publish(&self, req: &PublishRequest) -> Result<PhaseResult, ActivityError>;

    async fn deploy(&self, req: &DeployRequest) -> Result<DeploymentRecord, ActivityError>;

    async fn rollback(&self, req: &RollbackRequest) -> Result<RollbackReport, ActivityError>;

    async fn notify_approval_request(&self, notice: &ApprovalNotice) -> Result<(), ActivityError>;

    async fn notify_approval_decision(&self, notice: &DecisionNotice) -> Result<(), ActivityError>;
}
