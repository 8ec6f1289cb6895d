use std::collections::HashMap;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::InjectExecutor;
use crate::config::ExecutorConfig;
use crate::queue::{ExecutorError, InjectOptions, InjectOutput, InjectPayload};

/// Runs each inject through an external command.
///
/// The payload text is written to stdin and stdout becomes the output
/// content. Sender, channel and priority are exported as `INJECTQ_*`
/// environment variables. A signalled token kills the child.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl CommandExecutor {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
        }
    }
}

#[async_trait]
impl InjectExecutor for CommandExecutor {
    async fn execute(
        &self,
        payload: InjectPayload,
        options: InjectOptions,
        cancel: CancellationToken,
    ) -> Result<InjectOutput, ExecutorError> {
        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .envs(&self.env)
            .env("INJECTQ_PRIORITY", options.effective_priority().to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(sender) = &options.sender_id {
            command.env("INJECTQ_SENDER_ID", sender);
        }
        if let Some(channel) = &options.channel {
            command.env("INJECTQ_CHANNEL", channel);
        }
        if !options.context_providers.is_empty() {
            command.env("INJECTQ_CONTEXT", options.context_providers.join(","));
        }

        let mut child = command.spawn()?;
        let stdin = child.stdin.take();
        let input = payload.as_text().to_string();
        let feed_stdin = async move {
            if let Some(mut stdin) = stdin {
                match stdin.write_all(input.as_bytes()).await {
                    // The command may exit without reading all of its input.
                    Err(e) if e.kind() != io::ErrorKind::BrokenPipe => return Err(e),
                    _ => {}
                }
                // Closing stdin signals end of input.
                drop(stdin);
            }
            Ok(())
        };
        // stdout is drained while stdin is still being written, so a command
        // that echoes its input never stalls on a full pipe.
        let run = async move {
            let (fed, output) = tokio::join!(feed_stdin, child.wait_with_output());
            fed.and(output)
        };

        let output = tokio::select! {
            output = run => output?,
            _ = cancel.cancelled() => {
                // Dropping `run` drops the child, which kills it.
                debug!(command = %self.command, "Inject cancelled, killing command");
                return Err("cancelled while running".into());
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "command exited with status {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )
            .into());
        }

        if let Some(cb) = &options.on_chunk {
            cb.call(&stdout);
        }

        Ok(InjectOutput {
            content: stdout,
            metadata: serde_json::json!({ "media": payload.media().len() }),
        })
    }
}
