//! Pipeline event log
//!
//! Every decision the coordinator takes is recorded as a `PipelineEvent` before
//! it is acted upon. Replaying the log rebuilds the exact control-flow state,
//! which is what lets a pipeline survive process restarts while suspended.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::deployment::DeploymentRecord;
use crate::domain::outcome::PipelineOutcome;
use crate::domain::phase::{Phase, PhaseResult};
use crate::domain::pipeline::PipelineRequest;
use crate::domain::signal::{ApprovalDecision, ValidationDecision};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    Started {
        request: PipelineRequest,
    },
    /// Build, test or publish returned; a failed test report is still a completion
    PhaseCompleted {
        result: PhaseResult,
    },
    /// One attempt of an external call failed; the retry policy may try again
    ActivityAttemptFailed {
        phase: Phase,
        attempt: u32,
        error: String,
    },
    ActivityFailed {
        phase: Phase,
        error: String,
    },
    Deployed {
        record: DeploymentRecord,
    },
    ApprovalRequested {
        image: String,
        staging_endpoint: String,
    },
    NotificationFailed {
        error: String,
    },
    ApprovalReceived {
        signal_id: i64,
        decision: ApprovalDecision,
        received_at: DateTime<Utc>,
    },
    ValidationWindowOpened {
        deadline: DateTime<Utc>,
    },
    ValidationReceived {
        signal_id: i64,
        decision: ValidationDecision,
        received_at: DateTime<Utc>,
    },
    ValidationTimedOut,
    RollbackCompleted {
        message: String,
    },
    RollbackFailed {
        error: String,
    },
    Completed {
        outcome: PipelineOutcome,
    },
}

impl PipelineEvent {
    /// Informational events never influence a decision, so they may be
    /// appended out of band (from detached tasks) without breaking replay.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            PipelineEvent::ActivityAttemptFailed { .. } | PipelineEvent::NotificationFailed { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Started { .. } => "started",
            PipelineEvent::PhaseCompleted { .. } => "phase_completed",
            PipelineEvent::ActivityAttemptFailed { .. } => "activity_attempt_failed",
            PipelineEvent::ActivityFailed { .. } => "activity_failed",
            PipelineEvent::Deployed { .. } => "deployed",
            PipelineEvent::ApprovalRequested { .. } => "approval_requested",
            PipelineEvent::NotificationFailed { .. } => "notification_failed",
            PipelineEvent::ApprovalReceived { .. } => "approval_received",
            PipelineEvent::ValidationWindowOpened { .. } => "validation_window_opened",
            PipelineEvent::ValidationReceived { .. } => "validation_received",
            PipelineEvent::ValidationTimedOut => "validation_timed_out",
            PipelineEvent::RollbackCompleted { .. } => "rollback_completed",
            PipelineEvent::RollbackFailed { .. } => "rollback_failed",
            PipelineEvent::Completed { .. } => "completed",
        }
    }
}

/// An event as persisted in the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub seq: i64,
    pub recorded_at: DateTime<Utc>,
    pub event: PipelineEvent,
}
