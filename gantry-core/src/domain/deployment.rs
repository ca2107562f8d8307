//! Deployment domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::pipeline::Environment;

/// Result of a deploy call
///
/// At most two exist per pipeline: one for staging and one for production.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub environment: Environment,
    pub endpoint: String,
    pub success: bool,
    pub deployed_at: DateTime<Utc>,
    /// Image the environment ran before this deploy; `None` for a first deploy
    #[serde(default)]
    pub previous_image: Option<String>,
}
