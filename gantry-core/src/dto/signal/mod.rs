//! Signal DTOs

use serde::{Deserialize, Serialize};

/// Reply to an approval or validation submission
///
/// Duplicate and late signals are acknowledged but not applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalReceipt {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignored_reason: Option<String>,
}

impl SignalReceipt {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            ignored_reason: None,
        }
    }

    pub fn ignored(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            ignored_reason: Some(reason.into()),
        }
    }
}
