//! Activity request/response types
//!
//! The typed contract between the coordinator and the external calls that do
//! the actual work. The coordinator only ever sees these shapes plus a failure.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{Environment, PipelineRequest};
use crate::domain::signal::ApprovalDecision;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub image_name: String,
    pub tag: String,
    pub build_context: String,
    pub dockerfile: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRequest {
    pub image_name: String,
    pub tag: String,
    pub build_context: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub image_name: String,
    pub tag: String,
    pub registry_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    pub environment: Environment,
    /// Fully qualified image reference, including registry
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub environment: Environment,
    pub reason: String,
    /// Release to put back; rolling back means deploying this image again
    pub restore_image: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    pub success: bool,
    pub message: String,
}

/// Notification sent when a pipeline starts waiting for approval
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalNotice {
    pub pipeline_id: Uuid,
    pub image: String,
    pub environment: Environment,
    pub staging_endpoint: String,
}

/// Notification sent once an approval decision has been taken
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionNotice {
    pub pipeline_id: Uuid,
    pub image: String,
    pub environment: Environment,
    pub decision: ApprovalDecision,
    pub decided_at: chrono::DateTime<chrono::Utc>,
}

/// External call the coordinator wants executed next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityCall {
    Build(BuildRequest),
    Test(TestRequest),
    Publish(PublishRequest),
    Deploy(DeployRequest),
    Rollback(RollbackRequest),
}

impl From<&PipelineRequest> for BuildRequest {
    fn from(req: &PipelineRequest) -> Self {
        BuildRequest {
            image_name: req.image_name.clone(),
            tag: req.tag.clone(),
            build_context: req.build_context.clone(),
            dockerfile: req.dockerfile.clone(),
        }
    }
}

impl From<&PipelineRequest> for TestRequest {
    fn from(req: &PipelineRequest) -> Self {
        TestRequest {
            image_name: req.image_name.clone(),
            tag: req.tag.clone(),
            build_context: req.build_context.clone(),
        }
    }
}

impl From<&PipelineRequest> for PublishRequest {
    fn from(req: &PipelineRequest) -> Self {
        PublishRequest {
            image_name: req.image_name.clone(),
            tag: req.tag.clone(),
            registry_url: req.registry_url.clone(),
        }
    }
}
