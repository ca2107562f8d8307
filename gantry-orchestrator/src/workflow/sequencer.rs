//! Build, test and publish phases
//!
//! Each phase is one retried call. A test run that reports failures comes
//! back as a completed phase and is never retried; the state machine turns it
//! into the terminal outcome.

use gantry_core::domain::activity::{BuildRequest, PublishRequest, TestRequest};
use gantry_core::domain::event::PipelineEvent;
use gantry_core::domain::phase::{Phase, PhaseResult};
use tracing::info;
use uuid::Uuid;

use crate::activity::ActivityError;
use crate::workflow::coordinator::WorkflowEngine;

impl WorkflowEngine {
    pub(super) async fn build(&self, id: Uuid, req: &BuildRequest) -> PipelineEvent {
        info!(image = %req.image_name, tag = %req.tag, "Phase started: build");
        let result = self
            .call_with_retry(id, Phase::Build, || self.activities.build(req))
            .await;
        phase_event(Phase::Build, result)
    }

    pub(super) async fn test(&self, id: Uuid, req: &TestRequest) -> PipelineEvent {
        info!(image = %req.image_name, tag = %req.tag, "Phase started: test");
        let result = self
            .call_with_retry(id, Phase::Test, || self.activities.test(req))
            .await;
        phase_event(Phase::Test, result)
    }

    pub(super) async fn publish(&self, id: Uuid, req: &PublishRequest) -> PipelineEvent {
        info!(image = %req.image_name, tag = %req.tag, registry = %req.registry_url, "Phase started: publish");
        let result = self
            .call_with_retry(id, Phase::Publish, || self.activities.publish(req))
            .await;
        phase_event(Phase::Publish, result)
    }
}

fn phase_event(phase: Phase, result: Result<PhaseResult, ActivityError>) -> PipelineEvent {
    match result {
        Ok(result) => {
            info!(
                phase = %phase,
                success = result.success,
                duration_ms = result.duration_ms,
                artifact = result.artifact.as_deref().unwrap_or("-"),
                "Phase finished"
            );
            PipelineEvent::PhaseCompleted { result }
        }
        Err(e) => PipelineEvent::ActivityFailed {
            phase,
            error: e.to_string(),
        },
    }
}
