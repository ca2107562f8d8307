//! Pipeline domain types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Target environment of a pipeline run
///
/// Parsed once at the request boundary; nothing past validation ever compares
/// environment names as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staging" | "stage" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(RequestError::UnknownEnvironment(other.to_string())),
        }
    }
}

/// Errors raised while validating a pipeline request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("unknown environment '{0}' (expected staging or production)")]
    UnknownEnvironment(String),

    #[error("{0} cannot be empty")]
    EmptyField(&'static str),

    #[error("{field} is too long (max {max} characters)")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} contains invalid character '{found}'")]
    InvalidCharacter { field: &'static str, found: char },
}

/// Immutable input of a pipeline run
///
/// Created once by the external trigger and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub image_name: String,
    pub tag: String,
    /// Registry host (and optional path); empty means the local image store
    pub registry_url: String,
    pub build_context: String,
    pub dockerfile: String,
    pub environment: Environment,
}

impl PipelineRequest {
    /// Local `image:tag` reference produced by the build phase
    pub fn local_reference(&self) -> String {
        format!("{}:{}", self.image_name, self.tag)
    }

    /// Fully qualified reference used by every phase after publish
    pub fn artifact_reference(&self) -> String {
        let registry = self.registry_url.trim_end_matches('/');
        if registry.is_empty() {
            self.local_reference()
        } else {
            format!("{}/{}:{}", registry, self.image_name, self.tag)
        }
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        validate_reference_part("image_name", &self.image_name, 255)?;
        validate_reference_part("tag", &self.tag, 128)?;

        if self.build_context.trim().is_empty() {
            return Err(RequestError::EmptyField("build_context"));
        }
        if self.dockerfile.trim().is_empty() {
            return Err(RequestError::EmptyField("dockerfile"));
        }

        Ok(())
    }
}

fn validate_reference_part(field: &'static str, value: &str, max: usize) -> Result<(), RequestError> {
    if value.trim().is_empty() {
        return Err(RequestError::EmptyField(field));
    }
    if value.len() > max {
        return Err(RequestError::TooLong { field, max });
    }
    if let Some(found) = value
        .chars()
        .find(|c| c.is_whitespace() || *c == ':' || *c == '@')
    {
        return Err(RequestError::InvalidCharacter { field, found });
    }
    Ok(())
}

/// A persisted pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub request: PipelineRequest,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(registry: &str) -> PipelineRequest {
        PipelineRequest {
            image_name: "demo-app".to_string(),
            tag: "v1.0.0".to_string(),
            registry_url: registry.to_string(),
            build_context: "./sample-app".to_string(),
            dockerfile: "Dockerfile".to_string(),
            environment: Environment::Staging,
        }
    }

    #[test]
    fn test_environment_aliases() {
        assert_eq!("staging".parse::<Environment>(), Ok(Environment::Staging));
        assert_eq!("stage".parse::<Environment>(), Ok(Environment::Staging));
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!(
            "qa".parse::<Environment>(),
            Err(RequestError::UnknownEnvironment("qa".to_string()))
        );
    }

    #[test]
    fn test_artifact_reference_with_registry() {
        assert_eq!(
            request("registry.local:5000/").artifact_reference(),
            "registry.local:5000/demo-app:v1.0.0"
        );
    }

    #[test]
    fn test_artifact_reference_without_registry() {
        assert_eq!(request("").artifact_reference(), "demo-app:v1.0.0");
    }

    #[test]
    fn test_validate_rejects_bad_tag() {
        let mut req = request("");
        req.tag = "v1 0".to_string();
        assert!(matches!(
            req.validate(),
            Err(RequestError::InvalidCharacter { field: "tag", .. })
        ));

        req.tag = String::new();
        assert_eq!(req.validate(), Err(RequestError::EmptyField("tag")));
    }
}
