//! Approve command handler
//!
//! Submits a decision to the approval API of a waiting `deploy`.

use anyhow::{Context, Result};
use colored::*;
use conveyor_client::ConveyorClient;
use conveyor_core::error::exit_code;

use crate::output;

/// Handle `conveyor approve <environment>`
///
/// # Arguments
/// * `environment` - Target whose deployment is waiting
/// * `approved` - `false` when `--reject` was given
/// * `actor` - Identity recorded as the decider
/// * `url` - Approval API base URL
pub async fn handle_approve_command(
    environment: &str,
    approved: bool,
    actor: &str,
    url: &str,
) -> Result<i32> {
    let client = ConveyorClient::new(url);

    let pending = client
        .list_pending_approvals()
        .await
        .with_context(|| format!("Failed to reach approval API at {}", url))?;

    let Some(request) = pending.iter().find(|p| p.target == environment) else {
        println!(
            "{}",
            format!("No approval pending for {}.", environment).yellow()
        );
        if !pending.is_empty() {
            println!("Pending approvals:");
            for p in &pending {
                println!("  {} {}", p.target.cyan(), p.message.dimmed());
            }
        }
        anyhow::bail!("No approval pending for {} at {}", environment, url);
    };

    println!("{} {}", "Request:".bold(), request.message);

    let decision = match client.submit_decision(environment, approved, actor).await {
        Ok(decision) => decision,
        Err(e) if e.is_not_found() => {
            anyhow::bail!("Approval for {} is no longer pending (timed out?)", environment)
        }
        Err(e) => {
            let context = format!("Failed to submit decision for {}", environment);
            return Err(anyhow::Error::new(e).context(context));
        }
    };

    if decision.is_approved() {
        println!("{}", format!("✓ Deployment to {} approved", environment).green().bold());
    } else {
        println!("{}", format!("✗ Deployment to {} rejected", environment).red().bold());
    }
    output::print_decision(&decision);

    Ok(exit_code::SUCCESS)
}
