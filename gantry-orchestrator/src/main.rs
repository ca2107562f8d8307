//! Gantry Orchestrator
//!
//! Runs deployment pipelines: build, test and publish an image, deploy it to
//! staging and, for production runs, gate the release on a human approval and
//! a post-deploy validation window with automatic rollback.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod activity;
pub mod api;
pub mod config;
pub mod db;
pub mod repository;
pub mod service;
pub mod workflow;

use crate::activity::ShellActivities;
use crate::config::{Config, StoreKind};
use crate::repository::{MemoryPipelineStore, PgPipelineStore, PipelineStore};
use crate::service::{AppState, pipeline_service};
use crate::workflow::{WorkflowEngine, WorkflowSettings};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gantry_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Gantry Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        store = ?config.store,
        validation_window_secs = config.validation_window.as_secs(),
        max_attempts = config.retry.max_attempts,
        "Configuration loaded"
    );

    let store = open_store(&config).await?;

    let activities = Arc::new(ShellActivities::new(config.clone()));
    let engine = WorkflowEngine::new(
        store.clone(),
        activities,
        WorkflowSettings::from_config(&config),
    );
    let state = AppState::new(store, engine);

    let resumed = pipeline_service::resume_unfinished(&state)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to resume pipelines: {:?}", e))?;
    if resumed > 0 {
        tracing::info!("Resumed {} unfinished pipelines", resumed);
    }

    // Build router with all API endpoints
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}

async fn open_store(config: &Config) -> Result<Arc<dyn PipelineStore>> {
    match config.store {
        StoreKind::Postgres => {
            tracing::info!("Connecting to database...");

            let pool = db::create_pool(&config.database_url)
                .await
                .context("Failed to create database pool")?;

            tracing::info!("Database connection pool created");

            db::run_migrations(&pool)
                .await
                .context("Failed to run database migrations")?;

            Ok(Arc::new(PgPipelineStore::new(pool)))
        }
        StoreKind::Memory => {
            tracing::warn!("Using the in-memory store, pipelines will not survive a restart");
            Ok(Arc::new(MemoryPipelineStore::new()))
        }
    }
}
