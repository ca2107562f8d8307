//! Pipeline DTOs for inter-service communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{PipelineRequest, RequestError};
use crate::domain::status::{PipelineStatus, RunState};

/// Request to start a new pipeline run
///
/// `environment` stays a string here and is parsed once in `into_request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipelineRun {
    pub image_name: String,
    #[serde(default = "default_tag")]
    pub tag: String,
    #[serde(default)]
    pub registry_url: String,
    #[serde(default = "default_build_context")]
    pub build_context: String,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    pub environment: String,
}

fn default_tag() -> String {
    "v1.0.0".to_string()
}

fn default_build_context() -> String {
    "./sample-app".to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

impl CreatePipelineRun {
    pub fn into_request(self) -> Result<PipelineRequest, RequestError> {
        let request = PipelineRequest {
            environment: self.environment.parse()?,
            image_name: self.image_name.trim().to_string(),
            tag: self.tag.trim().to_string(),
            registry_url: self.registry_url.trim().to_string(),
            build_context: self.build_context,
            dockerfile: self.dockerfile,
        };
        request.validate()?;
        Ok(request)
    }
}

/// Response after a pipeline run was accepted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineCreated {
    pub id: Uuid,
    pub image: String,
}

/// One row of the pipeline listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: Uuid,
    pub image: String,
    pub environment: String,
    pub state: RunState,
    pub stage: String,
    pub outcome: Option<String>,
    pub alert: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&PipelineStatus> for PipelineSummary {
    fn from(status: &PipelineStatus) -> Self {
        PipelineSummary {
            id: status.id,
            image: status.image.clone(),
            environment: status.request.environment.to_string(),
            state: status.state,
            stage: status.stage.name().to_string(),
            outcome: status.outcome.as_ref().map(|o| o.label().to_string()),
            alert: status.alert,
            started_at: status.started_at,
            completed_at: status.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::Environment;

    #[test]
    fn test_create_defaults_fill_missing_fields() {
        let body = r#"{"image_name": "demo-app", "environment": "prod"}"#;
        let create: CreatePipelineRun = serde_json::from_str(body).unwrap();
        let request = create.into_request().unwrap();

        assert_eq!(request.tag, "v1.0.0");
        assert_eq!(request.build_context, "./sample-app");
        assert_eq!(request.dockerfile, "Dockerfile");
        assert_eq!(request.environment, Environment::Production);
        assert_eq!(request.artifact_reference(), "demo-app:v1.0.0");
    }

    #[test]
    fn test_create_rejects_unknown_environment() {
        let create = CreatePipelineRun {
            image_name: "demo-app".to_string(),
            tag: "v1".to_string(),
            registry_url: String::new(),
            build_context: ".".to_string(),
            dockerfile: "Dockerfile".to_string(),
            environment: "qa".to_string(),
        };
        assert!(matches!(
            create.into_request(),
            Err(RequestError::UnknownEnvironment(_))
        ));
    }
}
