//! Approval and validation signals

use crate::OrchestratorClient;
use crate::error::Result;
use gantry_core::domain::signal::{ApprovalDecision, ValidationDecision};
use gantry_core::dto::signal::SignalReceipt;
use uuid::Uuid;

impl OrchestratorClient {
    /// Approve or reject promotion of a staged build to production
    ///
    /// A decision for a gate that was already resolved comes back with
    /// `accepted == false` rather than as an error.
    pub async fn submit_approval(
        &self,
        pipeline_id: Uuid,
        decision: &ApprovalDecision,
    ) -> Result<SignalReceipt> {
        let url = format!("{}/api/pipeline/{}/approval", self.base_url, pipeline_id);
        tracing::debug!(%pipeline_id, approved = decision.approved, "Submitting approval");
        let response = self.client.post(&url).json(decision).send().await?;

        self.handle_response(response).await
    }

    /// Confirm or fail a production deployment during its validation window
    pub async fn submit_validation(
        &self,
        pipeline_id: Uuid,
        decision: &ValidationDecision,
    ) -> Result<SignalReceipt> {
        let url = format!("{}/api/pipeline/{}/validation", self.base_url, pipeline_id);
        tracing::debug!(%pipeline_id, validated = decision.validated, "Submitting validation");
        let response = self.client.post(&url).json(decision).send().await?;

        self.handle_response(response).await
    }
}
