//! HTTP server command implementation.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::signal;
use tokio::sync::{Mutex, oneshot};
use tracing::{info, warn};

use injectq::build_info;
use injectq::config::Config;
use injectq::executor::CommandExecutor;
use injectq::queue::QueueManager;
use injectq::restart::{DrainCoordinator, RestartError, RestartHook, RestartReason};
use injectq::server::{self, AppState};

use super::TokenScope;

pub async fn run(
    config_path: &str,
    host_override: Option<IpAddr>,
    port_override: Option<u16>,
) -> Result<()> {
    let mut config = Config::load(config_path).await?;

    // CLI overrides config
    if let Some(host) = host_override {
        config.server.host = host.to_string();
    }
    if let Some(port) = port_override {
        config.server.port = port;
    }

    let executor = Arc::new(CommandExecutor::from_config(&config.executor));
    info!(command = %config.executor.command, "Executor configured");

    let queues = QueueManager::new(executor, config.queue.manager_config());
    let reaper = queues.spawn_reaper(config.queue.reap_interval());

    // Create shutdown channel for HTTP- and restart-triggered shutdown
    let (shutdown_tx, shutdown_rx) = server::shutdown_channel();
    let shutdown_tx = Arc::new(Mutex::new(Some(shutdown_tx)));

    let hook = Arc::new(ShutdownOnRestart {
        queues: queues.clone(),
        grace: config.restart.shutdown_grace(),
        shutdown_tx: shutdown_tx.clone(),
    });
    let restart = DrainCoordinator::new(
        Arc::new(queues.clone()),
        hook,
        config.restart.coordinator_config(),
    );

    let state = AppState {
        queues: queues.clone(),
        restart,
        admin_token: config.server.admin_token.clone(),
        api_token: config.server.api_token.clone(),
        max_connections: config.server.max_connections,
        shutdown_tx,
    };

    let app = server::build_app(state, config.server.request_timeout_seconds);

    let ip: IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let closing = server::close_queues_on(
        shutdown_signal(shutdown_rx),
        queues.clone(),
        config.restart.shutdown_grace(),
    );

    info!(addr = %addr, version = %build_info::version_string(), "Starting server");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(closing)
    .await?;

    reaper.abort();

    info!("Server stopped");
    Ok(())
}

/// Stop a running server by calling the shutdown endpoint.
pub async fn stop(config_path: &str, port_override: Option<u16>) -> Result<()> {
    let client = super::connect(config_path, port_override, TokenScope::Admin).await?;
    client.shutdown().await.context("Failed to stop server")?;

    println!("Shutdown initiated");
    Ok(())
}

// ============================================================================
// Restart Hook
// ============================================================================

/// Closes every session queue, then stops the HTTP server so the process
/// exits and its supervisor starts a fresh one.
struct ShutdownOnRestart {
    queues: QueueManager,
    grace: Duration,
    shutdown_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

#[async_trait]
impl RestartHook for ShutdownOnRestart {
    async fn restart(&self, reason: RestartReason) -> Result<(), RestartError> {
        info!(reason = reason.as_str(), "Draining queues for restart");
        let dropped = self.queues.shutdown(self.grace).await;
        if dropped > 0 {
            warn!(dropped, "Queued injects dropped by restart");
        }

        match self.shutdown_tx.lock().await.take() {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => info!("Shutdown already in progress"),
        }
        Ok(())
    }
}

async fn shutdown_signal(http_shutdown: oneshot::Receiver<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
        _ = http_shutdown => info!("Received shutdown request, shutting down..."),
    }
}
