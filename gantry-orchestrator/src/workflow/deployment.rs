//! Deployment gate
//!
//! Deploys the published image to one environment. Whether the production
//! path follows is decided by the state machine from the request.

use gantry_core::domain::activity::DeployRequest;
use gantry_core::domain::event::PipelineEvent;
use gantry_core::domain::phase::Phase;
use tracing::info;
use uuid::Uuid;

use crate::workflow::coordinator::WorkflowEngine;

impl WorkflowEngine {
    pub(super) async fn deploy(&self, id: Uuid, req: &DeployRequest) -> PipelineEvent {
        info!(environment = %req.environment, image = %req.image, "Phase started: deploy");

        match self
            .call_with_retry(id, Phase::Deploy, || self.activities.deploy(req))
            .await
        {
            Ok(record) => {
                info!(environment = %record.environment, endpoint = %record.endpoint, "Deployed");
                PipelineEvent::Deployed { record }
            }
            Err(e) => PipelineEvent::ActivityFailed {
                phase: Phase::Deploy,
                error: e.to_string(),
            },
        }
    }
}
