mod commands;

use std::net::IpAddr;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

use injectq::config::DEFAULT_CONFIG_PATH;
use injectq::restart::DrainMode;

// ============================================================================
// CLI Types
// ============================================================================

/// injectq - per-session inject queue with restart-on-idle draining
#[derive(Parser, Debug)]
#[command(version = injectq::build_info::VERSION, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage the HTTP server
    Serve {
        #[command(subcommand)]
        action: Option<ServeAction>,

        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
        config: String,

        /// Host to bind to (overrides config file)
        #[arg(long, global = true)]
        host: Option<IpAddr>,

        /// Port to listen on (overrides config file)
        #[arg(short, long, global = true)]
        port: Option<u16>,
    },

    /// Schedule, inspect or cancel a restart-on-idle
    Restart {
        #[command(subcommand)]
        action: RestartAction,

        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
        config: String,

        /// Port of the running server (overrides config file)
        #[arg(short, long, global = true)]
        port: Option<u16>,
    },

    /// Submit an inject to a running server and print the result
    Inject {
        /// Session key to submit to
        session: String,

        /// Inject text
        text: String,

        /// Priority (higher runs first)
        #[arg(long)]
        priority: Option<i32>,

        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// Port of the running server (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show per-session queue stats of a running server
    Queues {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: String,

        /// Port of the running server (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[derive(Subcommand, Debug)]
enum ServeAction {
    /// Stop a running server
    Stop,
}

#[derive(Subcommand, Debug)]
enum RestartAction {
    /// Restart once the server has been idle long enough
    Schedule {
        /// Seconds with no active injects before restarting
        #[arg(long)]
        idle_threshold: Option<u64>,

        /// Hard ceiling, in seconds, on how long to wait
        #[arg(long)]
        max_wait: Option<u64>,

        /// What to do with active injects once max wait elapses
        #[arg(long, value_parser = parse_drain_mode)]
        drain_mode: Option<DrainMode>,
    },
    /// Show the restart state
    Status,
    /// Cancel a scheduled restart
    Cancel,
}

fn parse_drain_mode(s: &str) -> Result<DrainMode, String> {
    match s {
        "graceful" => Ok(DrainMode::Graceful),
        "force" => Ok(DrainMode::Force),
        other => Err(format!("unknown drain mode '{other}' (expected graceful or force)")),
    }
}

// ============================================================================
// Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    match run().await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            action,
            config,
            host,
            port,
        } => match action {
            Some(ServeAction::Stop) => commands::serve::stop(&config, port).await,
            None => commands::serve::run(&config, host, port).await,
        },
        Commands::Restart {
            action,
            config,
            port,
        } => match action {
            RestartAction::Schedule {
                idle_threshold,
                max_wait,
                drain_mode,
            } => {
                let request = injectq::restart::RestartRequest {
                    idle_threshold_seconds: idle_threshold,
                    max_wait_seconds: max_wait,
                    drain_mode,
                };
                commands::restart::schedule(&config, port, request).await
            }
            RestartAction::Status => commands::restart::status(&config, port).await,
            RestartAction::Cancel => commands::restart::cancel(&config, port).await,
        },
        Commands::Inject {
            session,
            text,
            priority,
            config,
            port,
        } => commands::inject::submit(&config, port, &session, &text, priority).await,
        Commands::Queues { config, port } => commands::inject::queues(&config, port).await,
    }
}

// ============================================================================
// Initialization
// ============================================================================

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
