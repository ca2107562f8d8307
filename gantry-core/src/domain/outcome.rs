//! Terminal pipeline outcomes

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::phase::Phase;

/// Terminal state of a pipeline run
///
/// Produced exactly once, when the coordinator exits. No transitions follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Succeeded,
    RejectedByApprover { approver: String, reason: String },
    TestsFailed { diagnostic: String },
    ActivityFailed { phase: Phase, error: String },
    RolledBack { reason: String },
    /// Production is running unvalidated code with no recorded remediation
    RollbackFailed { reason: String, error: String },
}

impl PipelineOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            PipelineOutcome::Succeeded => "succeeded",
            PipelineOutcome::RejectedByApprover { .. } => "rejected_by_approver",
            PipelineOutcome::TestsFailed { .. } => "tests_failed",
            PipelineOutcome::ActivityFailed { .. } => "activity_failed",
            PipelineOutcome::RolledBack { .. } => "rolled_back",
            PipelineOutcome::RollbackFailed { .. } => "rollback_failed",
        }
    }

    /// Whether this outcome needs a human to reconcile the environment
    pub fn requires_alert(&self) -> bool {
        matches!(self, PipelineOutcome::RollbackFailed { .. })
    }
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineOutcome::Succeeded => write!(f, "succeeded"),
            PipelineOutcome::RejectedByApprover { approver, reason } => {
                write!(f, "rejected by {}: {}", approver, reason)
            }
            PipelineOutcome::TestsFailed { diagnostic } => write!(f, "tests failed: {}", diagnostic),
            PipelineOutcome::ActivityFailed { phase, error } => {
                write!(f, "{} failed: {}", phase, error)
            }
            PipelineOutcome::RolledBack { reason } => write!(f, "rolled back ({})", reason),
            PipelineOutcome::RollbackFailed { reason, error } => {
                write!(f, "rollback after '{}' failed: {}", reason, error)
            }
        }
    }
}
