//! Phase domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// A discrete, externally retried unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Build,
    Test,
    Publish,
    Deploy,
    Rollback,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Build => "build",
            Phase::Test => "test",
            Phase::Publish => "publish",
            Phase::Deploy => "deploy",
            Phase::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a build, test or publish phase
///
/// A test run that executed but reported failures comes back as a
/// `PhaseResult` with `success == false`; that is data, not a call failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub phase: Phase,
    pub success: bool,
    /// Image id for build, digest for publish
    pub artifact: Option<String>,
    pub duration_ms: u64,
    pub diagnostic: Option<String>,
}

impl PhaseResult {
    pub fn succeeded(phase: Phase, artifact: Option<String>, duration_ms: u64) -> Self {
        Self {
            phase,
            success: true,
            artifact,
            duration_ms,
            diagnostic: None,
        }
    }

    pub fn failed(phase: Phase, diagnostic: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            phase,
            success: false,
            artifact: None,
            duration_ms,
            diagnostic: Some(diagnostic.into()),
        }
    }
}
