//! Signal domain types
//!
//! Signals are asynchronous, externally originated messages delivered to a
//! waiting pipeline. They are buffered in an inbox until the gate that
//! consumes them opens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Human decision on a production deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
    pub approver: String,
    #[serde(default)]
    pub reason: String,
}

/// Human confirmation that a production deployment is healthy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationDecision {
    pub validated: bool,
    pub validator: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Approval,
    Validation,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Approval => "approval",
            SignalKind::Validation => "validation",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approval" => Ok(SignalKind::Approval),
            "validation" => Ok(SignalKind::Validation),
            other => Err(format!("unknown signal kind '{}'", other)),
        }
    }
}

/// Signal payload as stored in the inbox
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Signal {
    Approval(ApprovalDecision),
    Validation(ValidationDecision),
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Approval(_) => SignalKind::Approval,
            Signal::Validation(_) => SignalKind::Validation,
        }
    }
}

/// A signal taken from the inbox, with its delivery metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedSignal {
    pub id: i64,
    pub signal: Signal,
    pub received_at: DateTime<Utc>,
}
