use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

use crate::queue::{DEFAULT_EVENT_CAPACITY, DEFAULT_MAX_PENDING, QueueManagerConfig};
use crate::restart::{CoordinatorConfig, DrainMode, RestartConfig};

/// Config file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "injectq.yaml";

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub restart: RestartSettings,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        let expanded = expand_env_vars(&contents)?;
        let config: Self = serde_saphyr::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "server.max_connections must be greater than 0".to_string(),
            ));
        }
        if self.queue.reap_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "queue.reap_interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.restart.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "restart.poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        self.restart
            .defaults()
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("restart: {e}")))
    }
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_pending() -> usize {
    DEFAULT_MAX_PENDING
}

fn default_idle_grace() -> u64 {
    60
}

fn default_reap_interval() -> u64 {
    30
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn default_idle_threshold() -> u64 {
    5
}

fn default_max_wait() -> u64 {
    300
}

fn default_poll_interval() -> u64 {
    250
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_command() -> String {
    "cat".to_string()
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand `${VAR}`, `${VAR:-default}` and `$$` in raw config text.
///
/// A lone `$` not followed by `{` or `$` is kept as-is.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                result.push_str(&parse_var_reference(&mut chars)?);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Resolve the reference following `${`, consuming the closing brace.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut name = String::new();
    let mut fallback: Option<String> = None;

    loop {
        match chars.next() {
            None => return Err(ConfigError::UnclosedVarReference),
            Some('}') => break,
            Some(':') if fallback.is_none() && chars.peek() == Some(&'-') => {
                chars.next();
                fallback = Some(String::new());
            }
            Some(c) => match fallback.as_mut() {
                Some(value) => value.push(c),
                None => name.push(c),
            },
        }
    }

    match std::env::var(&name) {
        Ok(value) => Ok(value),
        Err(_) => fallback.ok_or(ConfigError::MissingEnvVar(name)),
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Applies to every route except inject submission, which waits for
    /// its unit however long it runs.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Concurrent `/api/v1` requests; waiting inject submissions count.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Optional admin API token. If not set, admin endpoints only accept
    /// requests from localhost.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Optional token for `/api/v1`, with the same loopback fallback.
    #[serde(default)]
    pub api_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            max_connections: default_max_connections(),
            admin_token: None,
            api_token: None,
        }
    }
}

// ============================================================================
// QueueConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    /// Backlog bound per session; the active unit is not counted.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    #[serde(default = "default_idle_grace")]
    pub idle_grace_seconds: u64,
    #[serde(default = "default_reap_interval")]
    pub reap_interval_seconds: u64,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_pending: default_max_pending(),
            idle_grace_seconds: default_idle_grace(),
            reap_interval_seconds: default_reap_interval(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl QueueConfig {
    pub fn manager_config(&self) -> QueueManagerConfig {
        QueueManagerConfig {
            max_pending: self.max_pending,
            idle_grace: Duration::from_secs(self.idle_grace_seconds),
            event_capacity: self.event_capacity,
        }
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_seconds)
    }
}

// ============================================================================
// RestartSettings
// ============================================================================

/// Defaults applied to restart requests, plus coordinator tuning.
#[derive(Debug, Deserialize)]
pub struct RestartSettings {
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_seconds: u64,
    #[serde(default = "default_max_wait")]
    pub max_wait_seconds: u64,
    #[serde(default)]
    pub drain_mode: DrainMode,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How long shutdown waits for in-flight injects before exiting.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            idle_threshold_seconds: default_idle_threshold(),
            max_wait_seconds: default_max_wait(),
            drain_mode: DrainMode::default(),
            poll_interval_ms: default_poll_interval(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

impl RestartSettings {
    pub fn defaults(&self) -> RestartConfig {
        RestartConfig {
            idle_threshold_seconds: self.idle_threshold_seconds,
            max_wait_seconds: self.max_wait_seconds,
            drain_mode: self.drain_mode,
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            defaults: self.defaults(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

// ============================================================================
// ExecutorConfig
// ============================================================================

/// Command run once per inject.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
