//! Rollback trigger

use gantry_core::domain::activity::RollbackRequest;
use gantry_core::domain::event::PipelineEvent;
use gantry_core::domain::phase::Phase;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::activity::ActivityError;
use crate::workflow::coordinator::WorkflowEngine;

impl WorkflowEngine {
    pub(super) async fn rollback(&self, id: Uuid, req: &RollbackRequest) -> PipelineEvent {
        warn!(environment = %req.environment, reason = %req.reason, "Rolling back production");

        let result = self
            .call_with_retry(id, Phase::Rollback, || async move {
                let report = self.activities.rollback(req).await?;
                if report.success {
                    Ok::<_, ActivityError>(report)
                } else {
                    Err(ActivityError::Failed(report.message))
                }
            })
            .await;

        match result {
            Ok(report) => {
                info!(message = %report.message, "Rollback completed");
                PipelineEvent::RollbackCompleted {
                    message: report.message,
                }
            }
            Err(e) => {
                error!(
                    alert = true,
                    environment = %req.environment,
                    reason = %req.reason,
                    error = %e,
                    "ROLLBACK FAILED: production is running an unvalidated release"
                );
                PipelineEvent::RollbackFailed {
                    error: e.to_string(),
                }
            }
        }
    }
}
