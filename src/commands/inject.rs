//! `injectq inject` and `injectq queues`.

use anyhow::{Context, Result};

use injectq::api::SubmitInjectRequest;
use injectq::queue::{InjectOptions, InjectPayload};

use super::TokenScope;

pub async fn submit(
    config_path: &str,
    port_override: Option<u16>,
    session_key: &str,
    text: &str,
    priority: Option<i32>,
) -> Result<()> {
    let client = super::connect(config_path, port_override, TokenScope::Api).await?;
    let request = SubmitInjectRequest {
        payload: InjectPayload::text(text),
        options: InjectOptions {
            priority,
            channel: Some("cli".to_string()),
            ..Default::default()
        },
    };

    let response = client
        .submit_inject(session_key, &request)
        .await
        .context("Inject failed")?;
    println!("{}", response.content);
    Ok(())
}

pub async fn queues(config_path: &str, port_override: Option<u16>) -> Result<()> {
    let client = super::connect(config_path, port_override, TokenScope::Api).await?;
    let response = client.queues().await.context("Failed to fetch queues")?;

    println!(
        "{} sessions, {} active, {} queued",
        response.sessions, response.active_injects, response.queued_injects
    );
    for stats in &response.queues {
        let active = stats.active_unit_id.as_deref().unwrap_or("-");
        println!("{:<32} queued={:<4} active={}", stats.session_key, stats.queued, active);
    }
    Ok(())
}
