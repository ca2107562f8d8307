//! Queryable pipeline status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::deployment::DeploymentRecord;
use crate::domain::outcome::PipelineOutcome;
use crate::domain::phase::{Phase, PhaseResult};
use crate::domain::pipeline::PipelineRequest;
use crate::domain::signal::{ApprovalDecision, ValidationDecision};
use crate::domain::state::{PipelineState, Stage};

/// Coarse lifecycle of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    WaitingForApproval,
    WaitingForValidation,
    Completed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::WaitingForApproval => "waiting_for_approval",
            RunState::WaitingForValidation => "waiting_for_validation",
            RunState::Completed => "completed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Most recent failed attempt of an external call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptFailure {
    pub phase: Phase,
    pub attempt: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub decision: ApprovalDecision,
    pub received_at: DateTime<Utc>,
}

/// The validation race: at most one of `decision` and `timed_out_at` is set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub deadline: DateTime<Utc>,
    pub decision: Option<ValidationDecision>,
    pub received_at: Option<DateTime<Utc>>,
    pub timed_out_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub reason: String,
    pub success: bool,
    pub message: String,
    pub finished_at: DateTime<Utc>,
}

/// Full status view of a pipeline, as served to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub id: Uuid,
    pub request: PipelineRequest,
    pub image: String,
    pub state: RunState,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<PipelineOutcome>,
    /// Set when production needs manual reconciliation
    pub alert: bool,
    pub phases: Vec<PhaseResult>,
    pub deployments: Vec<DeploymentRecord>,
    pub approval: Option<ApprovalRecord>,
    pub validation: Option<ValidationRecord>,
    pub rollback: Option<RollbackRecord>,
    pub last_failure: Option<AttemptFailure>,
    pub notification_error: Option<String>,
}

impl PipelineState {
    pub fn run_state(&self) -> RunState {
        match self.stage {
            Stage::AwaitingApproval => RunState::WaitingForApproval,
            Stage::AwaitingValidation { .. } => RunState::WaitingForValidation,
            Stage::Completed { .. } => RunState::Completed,
            _ => RunState::Running,
        }
    }

    pub fn status(&self) -> PipelineStatus {
        let outcome = self.outcome().cloned();
        PipelineStatus {
            id: self.id,
            request: self.request.clone(),
            image: self.request.artifact_reference(),
            state: self.run_state(),
            stage: self.stage.clone(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            alert: outcome.as_ref().is_some_and(PipelineOutcome::requires_alert),
            outcome,
            phases: self.phases.clone(),
            deployments: self.deployments.clone(),
            approval: self.approval.clone(),
            validation: self.validation.clone(),
            rollback: self.rollback.clone(),
            last_failure: self.last_failure.clone(),
            notification_error: self.notification_error.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::PipelineEvent;
    use crate::domain::pipeline::Environment;

    #[test]
    fn test_status_reports_last_attempt_failure() {
        let request = PipelineRequest {
            image_name: "demo-app".to_string(),
            tag: "v2".to_string(),
            registry_url: String::new(),
            build_context: ".".to_string(),
            dockerfile: "Dockerfile".to_string(),
            environment: Environment::Production,
        };
        let mut state = PipelineState::new(Uuid::new_v4(), request, Utc::now());
        state
            .apply(
                &PipelineEvent::ActivityAttemptFailed {
                    phase: Phase::Build,
                    attempt: 2,
                    error: "context missing".to_string(),
                },
                Utc::now(),
            )
            .unwrap();

        let status = state.status();
        assert_eq!(status.state, RunState::Running);
        assert_eq!(status.image, "demo-app:v2");
        assert!(!status.alert);
        assert!(status.outcome.is_none());
        assert_eq!(status.last_failure.map(|f| f.attempt), Some(2));
    }
}
