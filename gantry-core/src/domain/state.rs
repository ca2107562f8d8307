//! Pipeline state machine
//!
//! `PipelineState` is a pure fold over the event log. The driver asks it for the
//! next step, performs that step, records the resulting event and applies it.
//! Nothing here touches the clock, the network or storage, so replaying the same
//! log always yields the same state and the same next step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::activity::{
    ActivityCall, ApprovalNotice, DeployRequest, RollbackRequest,
};
use crate::domain::deployment::DeploymentRecord;
use crate::domain::event::{PipelineEvent, RecordedEvent};
use crate::domain::outcome::PipelineOutcome;
use crate::domain::phase::{Phase, PhaseResult};
use crate::domain::pipeline::{Environment, PipelineRequest};
use crate::domain::signal::SignalKind;
use crate::domain::status::{ApprovalRecord, AttemptFailure, RollbackRecord, ValidationRecord};

/// Reason recorded when the validation window closes without a decision
pub const VALIDATION_TIMEOUT_REASON: &str = "validation timeout";

/// Where a pipeline currently is in its control flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    Building,
    Testing,
    Publishing,
    DeployingStaging,
    RequestingApproval,
    AwaitingApproval,
    DeployingProduction,
    OpeningValidationWindow,
    AwaitingValidation { deadline: DateTime<Utc> },
    RollingBack { reason: String },
    Finishing { outcome: PipelineOutcome },
    Completed { outcome: PipelineOutcome },
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Building => "building",
            Stage::Testing => "testing",
            Stage::Publishing => "publishing",
            Stage::DeployingStaging => "deploying_staging",
            Stage::RequestingApproval => "requesting_approval",
            Stage::AwaitingApproval => "awaiting_approval",
            Stage::DeployingProduction => "deploying_production",
            Stage::OpeningValidationWindow => "opening_validation_window",
            Stage::AwaitingValidation { .. } => "awaiting_validation",
            Stage::RollingBack { .. } => "rolling_back",
            Stage::Finishing { .. } => "finishing",
            Stage::Completed { .. } => "completed",
        }
    }

    /// Phase whose external call is in flight in this stage
    fn active_phase(&self) -> Option<Phase> {
        match self {
            Stage::Building => Some(Phase::Build),
            Stage::Testing => Some(Phase::Test),
            Stage::Publishing => Some(Phase::Publish),
            Stage::DeployingStaging | Stage::DeployingProduction => Some(Phase::Deploy),
            Stage::RollingBack { .. } => Some(Phase::Rollback),
            _ => None,
        }
    }
}

/// What the driver must do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    Run(ActivityCall),
    RequestApproval(ApprovalNotice),
    AwaitApproval,
    OpenValidationWindow,
    AwaitValidation { deadline: DateTime<Utc> },
    Complete(PipelineOutcome),
    Done(PipelineOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("event log is empty")]
    EmptyLog,

    #[error("event log must begin with 'started', found '{0}'")]
    MissingStart(&'static str),

    #[error("event '{event}' is not valid while {stage}")]
    Unexpected {
        event: &'static str,
        stage: &'static str,
    },

    #[error("{found} result reported while {expected} was running")]
    PhaseMismatch { found: Phase, expected: Phase },

    #[error("deployment to {found} reported while deploying to {expected}")]
    EnvironmentMismatch {
        found: Environment,
        expected: Environment,
    },

    #[error("completed with '{found}' but the decided outcome was '{expected}'")]
    OutcomeMismatch { found: String, expected: String },
}

/// Why a signal cannot affect a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalRejection {
    #[error("{0} signals only apply to production pipelines")]
    NotApplicable(SignalKind),

    #[error("{0} gate already resolved")]
    AlreadyResolved(SignalKind),

    #[error("pipeline already finished")]
    Finished,

    #[error("validation window closed at {0}")]
    WindowClosed(DateTime<Utc>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineState {
    pub(crate) id: Uuid,
    pub(crate) request: PipelineRequest,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) stage: Stage,
    pub(crate) phases: Vec<PhaseResult>,
    pub(crate) deployments: Vec<DeploymentRecord>,
    pub(crate) approval: Option<ApprovalRecord>,
    pub(crate) validation: Option<ValidationRecord>,
    pub(crate) rollback: Option<RollbackRecord>,
    pub(crate) last_failure: Option<AttemptFailure>,
    pub(crate) notification_error: Option<String>,
    pub(crate) completed_at: Option<DateTime<Utc>>,
}

impl PipelineState {
    pub fn new(id: Uuid, request: PipelineRequest, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            request,
            started_at,
            stage: Stage::Building,
            phases: Vec::new(),
            deployments: Vec::new(),
            approval: None,
            validation: None,
            rollback: None,
            last_failure: None,
            notification_error: None,
            completed_at: None,
        }
    }

    /// Rebuild a pipeline from its recorded events
    pub fn replay(id: Uuid, events: &[RecordedEvent]) -> Result<Self, TransitionError> {
        let (first, rest) = events.split_first().ok_or(TransitionError::EmptyLog)?;

        let mut state = match &first.event {
            PipelineEvent::Started { request } => {
                Self::new(id, request.clone(), first.recorded_at)
            }
            other => return Err(TransitionError::MissingStart(other.name())),
        };

        for recorded in rest {
            state.apply(&recorded.event, recorded.recorded_at)?;
        }

        Ok(state)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request(&self) -> &PipelineRequest {
        &self.request
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn deployments(&self) -> &[DeploymentRecord] {
        &self.deployments
    }

    pub fn approval(&self) -> Option<&ApprovalRecord> {
        self.approval.as_ref()
    }

    pub fn validation(&self) -> Option<&ValidationRecord> {
        self.validation.as_ref()
    }

    pub fn rollback(&self) -> Option<&RollbackRecord> {
        self.rollback.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    /// The terminal outcome, once it has been recorded
    pub fn outcome(&self) -> Option<&PipelineOutcome> {
        match &self.stage {
            Stage::Completed { outcome } => Some(outcome),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.stage, Stage::Completed { .. })
    }

    pub fn next_step(&self) -> NextStep {
        match &self.stage {
            Stage::Building => NextStep::Run(ActivityCall::Build((&self.request).into())),
            Stage::Testing => NextStep::Run(ActivityCall::Test((&self.request).into())),
            Stage::Publishing => NextStep::Run(ActivityCall::Publish((&self.request).into())),
            Stage::DeployingStaging => NextStep::Run(ActivityCall::Deploy(DeployRequest {
                environment: Environment::Staging,
                image: self.request.artifact_reference(),
            })),
            Stage::RequestingApproval => NextStep::RequestApproval(ApprovalNotice {
                pipeline_id: self.id,
                image: self.request.artifact_reference(),
                environment: Environment::Production,
                staging_endpoint: self.endpoint_of(Environment::Staging).unwrap_or_default(),
            }),
            Stage::AwaitingApproval => NextStep::AwaitApproval,
            Stage::DeployingProduction => NextStep::Run(ActivityCall::Deploy(DeployRequest {
                environment: Environment::Production,
                image: self.request.artifact_reference(),
            })),
            Stage::OpeningValidationWindow => NextStep::OpenValidationWindow,
            Stage::AwaitingValidation { deadline } => NextStep::AwaitValidation {
                deadline: *deadline,
            },
            Stage::RollingBack { reason } => NextStep::Run(ActivityCall::Rollback(RollbackRequest {
                environment: Environment::Production,
                reason: reason.clone(),
                restore_image: self.previous_image_of(Environment::Production),
            })),
            Stage::Finishing { outcome } => NextStep::Complete(outcome.clone()),
            Stage::Completed { outcome } => NextStep::Done(outcome.clone()),
        }
    }

    /// Apply one recorded event
    ///
    /// Rejects events that are impossible in the current stage, which is what
    /// keeps every gate single-shot: a second approval or a second race
    /// resolution has no stage left to land in.
    pub fn apply(&mut self, event: &PipelineEvent, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if event.is_informational() {
            self.note(event, at);
            return Ok(());
        }

        let stage = self.stage.clone();
        let next = match (&stage, event) {
            (Stage::Building, PipelineEvent::PhaseCompleted { result }) => {
                self.record_phase(result, Phase::Build)?;
                if result.success {
                    Stage::Testing
                } else {
                    finishing(activity_failed(result))
                }
            }
            (Stage::Testing, PipelineEvent::PhaseCompleted { result }) => {
                self.record_phase(result, Phase::Test)?;
                if result.success {
                    Stage::Publishing
                } else {
                    finishing(PipelineOutcome::TestsFailed {
                        diagnostic: result.diagnostic.clone().unwrap_or_default(),
                    })
                }
            }
            (Stage::Publishing, PipelineEvent::PhaseCompleted { result }) => {
                self.record_phase(result, Phase::Publish)?;
                if result.success {
                    Stage::DeployingStaging
                } else {
                    finishing(activity_failed(result))
                }
            }
            (
                Stage::Building
                | Stage::Testing
                | Stage::Publishing
                | Stage::DeployingStaging
                | Stage::DeployingProduction,
                PipelineEvent::ActivityFailed { phase, error },
            ) => {
                if let Some(expected) = stage.active_phase() {
                    if expected != *phase {
                        return Err(TransitionError::PhaseMismatch {
                            found: *phase,
                            expected,
                        });
                    }
                }
                finishing(PipelineOutcome::ActivityFailed {
                    phase: *phase,
                    error: error.clone(),
                })
            }
            (Stage::DeployingStaging, PipelineEvent::Deployed { record }) => {
                self.record_deployment(record, Environment::Staging)?;
                if !record.success {
                    finishing(deploy_reported_failure(record))
                } else {
                    match self.request.environment {
                        Environment::Staging => finishing(PipelineOutcome::Succeeded),
                        Environment::Production => Stage::RequestingApproval,
                    }
                }
            }
            (Stage::RequestingApproval, PipelineEvent::ApprovalRequested { .. }) => {
                Stage::AwaitingApproval
            }
            (
                Stage::AwaitingApproval,
                PipelineEvent::ApprovalReceived {
                    decision,
                    received_at,
                    ..
                },
            ) => {
                self.approval = Some(ApprovalRecord {
                    decision: decision.clone(),
                    received_at: *received_at,
                });
                if decision.approved {
                    Stage::DeployingProduction
                } else {
                    finishing(PipelineOutcome::RejectedByApprover {
                        approver: decision.approver.clone(),
                        reason: decision.reason.clone(),
                    })
                }
            }
            (Stage::DeployingProduction, PipelineEvent::Deployed { record }) => {
                self.record_deployment(record, Environment::Production)?;
                if record.success {
                    Stage::OpeningValidationWindow
                } else {
                    finishing(deploy_reported_failure(record))
                }
            }
            (Stage::OpeningValidationWindow, PipelineEvent::ValidationWindowOpened { deadline }) => {
                self.validation = Some(ValidationRecord {
                    deadline: *deadline,
                    decision: None,
                    received_at: None,
                    timed_out_at: None,
                });
                Stage::AwaitingValidation {
                    deadline: *deadline,
                }
            }
            (
                Stage::AwaitingValidation { .. },
                PipelineEvent::ValidationReceived {
                    decision,
                    received_at,
                    ..
                },
            ) => {
                if let Some(validation) = self.validation.as_mut() {
                    validation.decision = Some(decision.clone());
                    validation.received_at = Some(*received_at);
                }
                if decision.validated {
                    finishing(PipelineOutcome::Succeeded)
                } else {
                    Stage::RollingBack {
                        reason: format!(
                            "validation rejected by {}: {}",
                            decision.validator, decision.reason
                        ),
                    }
                }
            }
            (Stage::AwaitingValidation { .. }, PipelineEvent::ValidationTimedOut) => {
                if let Some(validation) = self.validation.as_mut() {
                    validation.timed_out_at = Some(at);
                }
                Stage::RollingBack {
                    reason: VALIDATION_TIMEOUT_REASON.to_string(),
                }
            }
            (Stage::RollingBack { reason }, PipelineEvent::RollbackCompleted { message }) => {
                self.rollback = Some(RollbackRecord {
                    reason: reason.clone(),
                    success: true,
                    message: message.clone(),
                    finished_at: at,
                });
                finishing(PipelineOutcome::RolledBack {
                    reason: reason.clone(),
                })
            }
            (Stage::RollingBack { reason }, PipelineEvent::RollbackFailed { error }) => {
                self.rollback = Some(RollbackRecord {
                    reason: reason.clone(),
                    success: false,
                    message: error.clone(),
                    finished_at: at,
                });
                finishing(PipelineOutcome::RollbackFailed {
                    reason: reason.clone(),
                    error: error.clone(),
                })
            }
            (Stage::Finishing { outcome }, PipelineEvent::Completed { outcome: recorded }) => {
                if recorded != outcome {
                    return Err(TransitionError::OutcomeMismatch {
                        found: recorded.label().to_string(),
                        expected: outcome.label().to_string(),
                    });
                }
                self.completed_at = Some(at);
                Stage::Completed {
                    outcome: outcome.clone(),
                }
            }
            (stage, event) => {
                return Err(TransitionError::Unexpected {
                    event: event.name(),
                    stage: stage.name(),
                });
            }
        };

        self.stage = next;
        Ok(())
    }

    /// Check whether a signal of this kind can still change the pipeline
    ///
    /// Signals that arrive before their gate opens are still accepted; they
    /// wait in the inbox until the gate consumes them.
    pub fn accepts_signal(&self, kind: SignalKind) -> Result<(), SignalRejection> {
        if self.request.environment != Environment::Production {
            return Err(SignalRejection::NotApplicable(kind));
        }

        let resolved = match kind {
            SignalKind::Approval => self.approval.is_some(),
            SignalKind::Validation => self
                .validation
                .as_ref()
                .is_some_and(|v| v.decision.is_some() || v.timed_out_at.is_some()),
        };
        if resolved {
            return Err(SignalRejection::AlreadyResolved(kind));
        }

        if matches!(self.stage, Stage::Finishing { .. } | Stage::Completed { .. }) {
            return Err(SignalRejection::Finished);
        }

        Ok(())
    }

    /// Check whether a signal received at `received_at` may join the inbox
    ///
    /// Adds the clock to `accepts_signal`: once the validation window has
    /// closed, a late validation can no longer win the race and is refused.
    pub fn admits_signal(
        &self,
        kind: SignalKind,
        received_at: DateTime<Utc>,
    ) -> Result<(), SignalRejection> {
        self.accepts_signal(kind)?;

        match (kind, &self.stage) {
            (SignalKind::Validation, Stage::AwaitingValidation { deadline })
                if received_at >= *deadline =>
            {
                Err(SignalRejection::WindowClosed(*deadline))
            }
            _ => Ok(()),
        }
    }

    pub fn endpoint_of(&self, environment: Environment) -> Option<String> {
        self.deployments
            .iter()
            .rev()
            .find(|d| d.environment == environment)
            .map(|d| d.endpoint.clone())
    }

    /// Image an environment ran before this pipeline deployed to it
    pub fn previous_image_of(&self, environment: Environment) -> Option<String> {
        self.deployments
            .iter()
            .rev()
            .find(|d| d.environment == environment)
            .and_then(|d| d.previous_image.clone())
    }

    fn note(&mut self, event: &PipelineEvent, at: DateTime<Utc>) {
        match event {
            PipelineEvent::ActivityAttemptFailed {
                phase,
                attempt,
                error,
            } => {
                self.last_failure = Some(AttemptFailure {
                    phase: *phase,
                    attempt: *attempt,
                    error: error.clone(),
                    failed_at: at,
                });
            }
            PipelineEvent::NotificationFailed { error } => {
                self.notification_error = Some(error.clone());
            }
            _ => {}
        }
    }

    fn record_phase(&mut self, result: &PhaseResult, expected: Phase) -> Result<(), TransitionError> {
        if result.phase != expected {
            return Err(TransitionError::PhaseMismatch {
                found: result.phase,
                expected,
            });
        }
        self.phases.push(result.clone());
        Ok(())
    }

    fn record_deployment(
        &mut self,
        record: &DeploymentRecord,
        expected: Environment,
    ) -> Result<(), TransitionError> {
        if record.environment != expected {
            return Err(TransitionError::EnvironmentMismatch {
                found: record.environment,
                expected,
            });
        }
        self.deployments.push(record.clone());
        Ok(())
    }
}

fn finishing(outcome: PipelineOutcome) -> Stage {
    Stage::Finishing { outcome }
}

fn activity_failed(result: &PhaseResult) -> PipelineOutcome {
    PipelineOutcome::ActivityFailed {
        phase: result.phase,
        error: result
            .diagnostic
            .clone()
            .unwrap_or_else(|| format!("{} reported failure", result.phase)),
    }
}

fn deploy_reported_failure(record: &DeploymentRecord) -> PipelineOutcome {
    PipelineOutcome::ActivityFailed {
        phase: Phase::Deploy,
        error: format!("{} deployment reported failure", record.environment),
    }
}
