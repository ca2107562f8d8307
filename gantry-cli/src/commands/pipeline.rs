//! Pipeline command handlers
//!
//! Starting pipeline runs, listing them and showing the status of one run.

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use colored::*;
use gantry_client::OrchestratorClient;
use gantry_core::domain::outcome::PipelineOutcome;
use gantry_core::domain::state::Stage;
use gantry_core::domain::status::{PipelineStatus, RunState};
use gantry_core::dto::pipeline::{CreatePipelineRun, PipelineSummary};

use crate::config::Config;
use crate::id_resolver::resolve_pipeline_id;

/// Pipeline subcommands
#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Start a pipeline run for an image
    Create {
        /// Image name, without registry or tag
        #[arg(short, long)]
        image: String,

        #[arg(short, long, default_value = "v1.0.0")]
        tag: String,

        /// Registry to publish to; empty keeps the image local
        #[arg(short, long, default_value = "")]
        registry: String,

        /// Build context directory
        #[arg(short, long, default_value = "./sample-app")]
        context: String,

        /// Dockerfile path, relative to the build context
        #[arg(short, long, default_value = "Dockerfile")]
        dockerfile: String,

        /// Target environment: staging (stage) or production (prod)
        #[arg(short, long, default_value = "staging")]
        env: String,
    },
    /// List all pipelines
    List,
    /// Show the status of a pipeline
    Status {
        /// Pipeline ID or unambiguous prefix
        id: String,

        /// Print the raw status document
        #[arg(long)]
        json: bool,
    },
}

pub async fn handle_pipeline_command(command: PipelineCommands, config: &Config) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);

    match command {
        PipelineCommands::Create {
            image,
            tag,
            registry,
            context,
            dockerfile,
            env,
        } => {
            let req = CreatePipelineRun {
                image_name: image,
                tag,
                registry_url: registry,
                build_context: context,
                dockerfile,
                environment: env,
            };
            create_pipeline(&client, &req).await
        }
        PipelineCommands::List => list_pipelines(&client).await,
        PipelineCommands::Status { id, json } => show_status(&client, &id, json).await,
    }
}

async fn create_pipeline(client: &OrchestratorClient, req: &CreatePipelineRun) -> Result<()> {
    let created = client.create_pipeline(req).await?;

    println!("{}", "✓ Pipeline started!".green().bold());
    println!("  ID:          {}", created.id.to_string().cyan());
    println!("  Image:       {}", created.image.bold());
    println!("  Environment: {}", req.environment);
    println!(
        "\n  Follow it with: {}",
        format!("gantry pipeline status {}", created.id).dimmed()
    );

    Ok(())
}

async fn list_pipelines(client: &OrchestratorClient) -> Result<()> {
    let pipelines = client.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{}", "No pipelines found.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} pipeline(s):", pipelines.len()).bold()
    );
    println!();
    for pipeline in &pipelines {
        print_pipeline_summary(pipeline);
    }

    Ok(())
}

async fn show_status(client: &OrchestratorClient, id: &str, json: bool) -> Result<()> {
    let uuid = resolve_pipeline_id(client, id).await?;
    let status = client.get_pipeline(uuid).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_pipeline_details(&status);
    }

    Ok(())
}

fn print_pipeline_summary(pipeline: &PipelineSummary) {
    let state = match &pipeline.outcome {
        Some(outcome) if pipeline.alert => outcome.red().bold(),
        Some(outcome) if outcome == "succeeded" => outcome.green(),
        Some(outcome) => outcome.yellow(),
        None => pipeline.state.as_str().cyan(),
    };

    println!("  {} {} [{}]", "▸".cyan(), pipeline.image.bold(), state);
    println!("    ID:          {}", pipeline.id.to_string().dimmed());
    println!("    Environment: {}", pipeline.environment.dimmed());
    println!("    Stage:       {}", pipeline.stage.dimmed());
    println!(
        "    Started:     {}",
        pipeline
            .started_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_pipeline_details(status: &PipelineStatus) {
    println!("{}", "Pipeline Details:".bold());
    println!("  ID:          {}", status.id.to_string().cyan());
    println!("  Image:       {}", status.image.bold());
    println!("  Environment: {}", status.request.environment);
    println!("  State:       {}", status.state.as_str());
    println!("  Stage:       {}", status.stage.name());
    println!(
        "  Started:     {}",
        status.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    match status.completed_at {
        Some(completed) => {
            println!("  Completed:   {}", completed.format("%Y-%m-%d %H:%M:%S"));
            println!(
                "  Duration:    {}s",
                (completed - status.started_at).num_seconds()
            );
        }
        None => println!(
            "  Running for: {}s",
            (Utc::now() - status.started_at).num_seconds()
        ),
    }
    if let Some(failure) = &status.last_failure {
        println!(
            "  Last error:  {} attempt {}: {}",
            failure.phase,
            failure.attempt,
            failure.error.red()
        );
    }

    if !status.phases.is_empty() {
        println!("\n{}", "Phases:".bold());
        for phase in &status.phases {
            let mark = if phase.success {
                "✓".green()
            } else {
                "✗".red()
            };
            println!(
                "  {} {:<8} {}",
                mark,
                phase.phase.to_string(),
                format!("{} ms", phase.duration_ms).dimmed()
            );
            if let Some(diagnostic) = &phase.diagnostic {
                println!("      {}", diagnostic.red());
            }
        }
    }

    if !status.deployments.is_empty() {
        println!("\n{}", "Deployments:".bold());
        for deployment in &status.deployments {
            println!(
                "  {:<11} {}",
                deployment.environment.to_string(),
                deployment.endpoint.cyan()
            );
        }
    }

    if let Some(approval) = &status.approval {
        let verdict = if approval.decision.approved {
            "approved".green()
        } else {
            "rejected".red()
        };
        println!(
            "\n{} {} by {}",
            "Approval:".bold(),
            verdict,
            approval.decision.approver
        );
        if !approval.decision.reason.is_empty() {
            println!("  Reason: {}", approval.decision.reason);
        }
    }

    if let Stage::AwaitingValidation { deadline } = &status.stage {
        let remaining = (*deadline - Utc::now()).num_seconds().max(0);
        println!(
            "\n{} {}s left to validate before automatic rollback",
            "Validation:".bold(),
            remaining
        );
    }

    if let Some(rollback) = &status.rollback {
        let result = if rollback.success {
            "completed".green()
        } else {
            "FAILED".red().bold()
        };
        println!("\n{} {} ({})", "Rollback:".bold(), result, rollback.reason);
        println!("  {}", rollback.message.dimmed());
    }

    if let Some(error) = &status.notification_error {
        println!("\n{} {}", "Notification failed:".yellow(), error);
    }

    match status.state {
        RunState::WaitingForApproval => println!(
            "\n{}",
            format!(
                "Waiting for approval: gantry approve {} --approver <name>",
                status.id
            )
            .yellow()
        ),
        RunState::WaitingForValidation => println!(
            "\n{}",
            format!(
                "Waiting for validation: gantry validate {} --validator <name>",
                status.id
            )
            .yellow()
        ),
        _ => {}
    }

    if let Some(outcome) = &status.outcome {
        println!("\n{} {}", "Outcome:".bold(), colorize_outcome(outcome));
    }
    if status.alert {
        println!(
            "{}",
            "ALERT: production needs manual attention".red().bold()
        );
    }
}

fn colorize_outcome(outcome: &PipelineOutcome) -> ColoredString {
    let text = outcome.to_string();
    match outcome {
        PipelineOutcome::Succeeded => text.green().bold(),
        PipelineOutcome::RollbackFailed { .. } => text.red().bold(),
        _ => text.yellow(),
    }
}
