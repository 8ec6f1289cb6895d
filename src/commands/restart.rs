//! `injectq restart` subcommands.

use anyhow::{Context, Result};

use injectq::restart::{RestartRequest, RestartStatus};

use super::TokenScope;

pub async fn schedule(
    config_path: &str,
    port_override: Option<u16>,
    request: RestartRequest,
) -> Result<()> {
    let client = super::connect(config_path, port_override, TokenScope::Admin).await?;
    let status = client
        .schedule_restart(&request)
        .await
        .context("Failed to schedule restart")?;

    if status.batched_requests > 1 {
        println!(
            "Restart already pending; request batched ({} total)",
            status.batched_requests
        );
    } else {
        println!("Restart scheduled");
    }
    print_status(&status);
    Ok(())
}

pub async fn status(config_path: &str, port_override: Option<u16>) -> Result<()> {
    let client = super::connect(config_path, port_override, TokenScope::Admin).await?;
    let status = client
        .restart_status()
        .await
        .context("Failed to fetch restart status")?;
    print_status(&status);
    Ok(())
}

pub async fn cancel(config_path: &str, port_override: Option<u16>) -> Result<()> {
    let client = super::connect(config_path, port_override, TokenScope::Admin).await?;
    let response = client
        .cancel_restart()
        .await
        .context("Failed to cancel restart")?;

    if response.cancelled {
        println!("Restart cancelled");
    } else {
        println!("No restart pending");
    }
    Ok(())
}

fn print_status(status: &RestartStatus) {
    println!("state:           {:?}", status.state);
    if let Some(config) = &status.config {
        println!(
            "config:          idle {}s, max wait {}s, {:?}",
            config.idle_threshold_seconds, config.max_wait_seconds, config.drain_mode
        );
    }
    if let Some(at) = &status.requested_at {
        println!("requested at:    {}", at.to_rfc3339());
    }
    println!("active injects:  {}", status.active_injects);
    println!("queued injects:  {}", status.queued_injects);
    println!("idle for:        {}s", status.idle_seconds);
    if let Some(eta) = status.estimated_restart_in {
        println!("restart in:      ~{eta}s");
    }
}
