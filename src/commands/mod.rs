//! CLI command implementations.

use anyhow::Result;

use injectq::client::InjectqClient;
use injectq::config::Config;

pub mod inject;
pub mod restart;
pub mod serve;

/// Which configured token a command authenticates with.
#[derive(Debug, Clone, Copy)]
pub enum TokenScope {
    Api,
    Admin,
}

/// Build a client for the server described by `config_path`.
///
/// Fails if the server process is not up. Readiness is not required, so
/// restart and stop commands still work while a restart drains.
pub async fn connect(
    config_path: &str,
    port_override: Option<u16>,
    scope: TokenScope,
) -> Result<InjectqClient> {
    let config = Config::load(config_path).await?;
    let port = port_override.unwrap_or(config.server.port);
    let token = match scope {
        TokenScope::Api => config.server.api_token,
        TokenScope::Admin => config.server.admin_token,
    };

    let client = InjectqClient::new(&format!("http://127.0.0.1:{port}")).with_token(token);
    if client.ping().await.is_err() {
        anyhow::bail!("No server running on port {port}");
    }
    Ok(client)
}
