//! Pipeline-related API endpoints

use crate::OrchestratorClient;
use crate::error::Result;
use gantry_core::domain::status::PipelineStatus;
use gantry_core::dto::pipeline::{CreatePipelineRun, PipelineCreated, PipelineSummary};
use uuid::Uuid;

impl OrchestratorClient {
    /// Start a new pipeline run
    ///
    /// The run proceeds in the background; poll [`get_pipeline`] for progress.
    ///
    /// # Example
    /// ```no_run
    /// # use gantry_client::OrchestratorClient;
    /// # use gantry_core::dto::pipeline::CreatePipelineRun;
    /// # async fn example() -> anyhow::Result<()> {
    /// let client = OrchestratorClient::new("http://localhost:8080");
    /// let created = client.create_pipeline(&CreatePipelineRun {
    ///     image_name: "demo-app".to_string(),
    ///     tag: "v1.0.0".to_string(),
    ///     registry_url: "registry.local:5000".to_string(),
    ///     build_context: "./sample-app".to_string(),
    ///     dockerfile: "Dockerfile".to_string(),
    ///     environment: "production".to_string(),
    /// }).await?;
    /// println!("started {}", created.id);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// [`get_pipeline`]: OrchestratorClient::get_pipeline
    pub async fn create_pipeline(&self, req: &CreatePipelineRun) -> Result<PipelineCreated> {
        let url = format!("{}/api/pipeline/create", self.base_url);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// List all pipeline runs, newest first
    pub async fn list_pipelines(&self) -> Result<Vec<PipelineSummary>> {
        let url = format!("{}/api/pipeline/list", self.base_url);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    pub async fn get_pipeline(&self, pipeline_id: Uuid) -> Result<PipelineStatus> {
        let url = format!("{}/api/pipeline/{}", self.base_url, pipeline_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }
}
