//! Approval and validation commands

use anyhow::Result;
use colored::*;
use gantry_client::OrchestratorClient;
use gantry_core::domain::signal::{ApprovalDecision, ValidationDecision};
use gantry_core::dto::signal::SignalReceipt;

use crate::config::Config;
use crate::id_resolver::resolve_pipeline_id;

pub async fn approve(
    config: &Config,
    id: &str,
    approved: bool,
    approver: String,
    reason: String,
) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);
    let uuid = resolve_pipeline_id(&client, id).await?;

    let decision = ApprovalDecision {
        approved,
        approver,
        reason,
    };
    let receipt = client.submit_approval(uuid, &decision).await?;

    let verb = if approved { "Approval" } else { "Rejection" };
    print_receipt(verb, &uuid.to_string(), &receipt);

    Ok(())
}

pub async fn validate(
    config: &Config,
    id: &str,
    validated: bool,
    validator: String,
    reason: String,
) -> Result<()> {
    let client = OrchestratorClient::new(&config.orchestrator_url);
    let uuid = resolve_pipeline_id(&client, id).await?;

    let decision = ValidationDecision {
        validated,
        validator,
        reason,
    };
    let receipt = client.submit_validation(uuid, &decision).await?;

    let verb = if validated {
        "Validation"
    } else {
        "Failed validation"
    };
    print_receipt(verb, &uuid.to_string(), &receipt);

    Ok(())
}

fn print_receipt(verb: &str, id: &str, receipt: &SignalReceipt) {
    if receipt.accepted {
        println!(
            "{}",
            format!("✓ {} recorded for pipeline {}", verb, id).green().bold()
        );
    } else {
        println!(
            "{} {}",
            format!("! {} ignored for pipeline {}:", verb, id).yellow().bold(),
            receipt.ignored_reason.as_deref().unwrap_or("no reason given")
        );
    }
}
