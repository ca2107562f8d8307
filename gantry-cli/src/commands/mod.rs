//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod pipeline;
mod signal;

pub use pipeline::PipelineCommands;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Pipeline management
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },
    /// Approve promotion of a staged build to production
    Approve {
        /// Pipeline ID or unambiguous prefix
        id: String,

        #[arg(long)]
        approver: String,

        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Reject promotion of a staged build to production
    Reject {
        /// Pipeline ID or unambiguous prefix
        id: String,

        #[arg(long)]
        approver: String,

        #[arg(long)]
        reason: String,
    },
    /// Confirm a production deployment inside its validation window
    Validate {
        /// Pipeline ID or unambiguous prefix
        id: String,

        #[arg(long)]
        validator: String,

        #[arg(long, default_value = "")]
        reason: String,

        /// Report the deployment as broken and trigger a rollback
        #[arg(long)]
        fail: bool,
    },
}

/// Route a command to its handler module
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Pipeline { command } => pipeline::handle_pipeline_command(command, config).await,
        Commands::Approve {
            id,
            approver,
            reason,
        } => signal::approve(config, &id, true, approver, reason).await,
        Commands::Reject {
            id,
            approver,
            reason,
        } => signal::approve(config, &id, false, approver, reason).await,
        Commands::Validate {
            id,
            validator,
            reason,
            fail,
        } => signal::validate(config, &id, !fail, validator, reason).await,
    }
}
