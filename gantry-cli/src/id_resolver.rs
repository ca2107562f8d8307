//! Resolution of pipeline id prefixes
//!
//! Lets users type a short, unambiguous prefix instead of a full UUID.

use anyhow::{Context, Result, anyhow};
use gantry_client::OrchestratorClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a pipeline ID or prefix to a full UUID
///
/// A full UUID is returned as is, without asking the orchestrator.
pub async fn resolve_pipeline_id(client: &OrchestratorClient, input: &str) -> Result<Uuid> {
    let id_or_prefix = IdOrPrefix::parse(input);
    if let IdOrPrefix::Full(uuid) = id_or_prefix {
        return Ok(uuid);
    }

    let pipelines = client
        .list_pipelines()
        .await
        .context("Failed to fetch pipelines for ID resolution")?;

    let ids: Vec<Uuid> = pipelines.iter().map(|p| p.id).collect();
    pick_unique(&id_or_prefix, &ids)
}

fn pick_unique(id_or_prefix: &IdOrPrefix, ids: &[Uuid]) -> Result<Uuid> {
    let matches: Vec<&Uuid> = ids.iter().filter(|id| id_or_prefix.matches(id)).collect();

    match matches.as_slice() {
        [] => Err(anyhow!(
            "No pipeline found with ID starting with '{}'",
            id_or_prefix
        )),
        [id] => Ok(**id),
        _ => {
            let ids: Vec<String> = matches.iter().map(|id| id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple pipelines: {}",
                id_or_prefix,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<Uuid> {
        vec![
            Uuid::parse_str("7f1c9a52-0d3e-4a8b-9c51-2f4e6d8a0b13").unwrap(),
            Uuid::parse_str("7f2d0b61-1e4f-4b9c-8d62-3a5f7e9b1c24").unwrap(),
        ]
    }

    #[test]
    fn test_unique_prefix_resolves() {
        let id = pick_unique(&IdOrPrefix::parse("7f1"), &ids()).unwrap();
        assert_eq!(id, ids()[0]);
    }

    #[test]
    fn test_ambiguous_prefix_is_an_error() {
        let err = pick_unique(&IdOrPrefix::parse("7f"), &ids()).unwrap_err();
        assert!(err.to_string().contains("Ambiguous prefix"));
    }

    #[test]
    fn test_unknown_prefix_is_an_error() {
        let err = pick_unique(&IdOrPrefix::parse("abc"), &ids()).unwrap_err();
        assert!(err.to_string().contains("No pipeline found"));
    }
}
