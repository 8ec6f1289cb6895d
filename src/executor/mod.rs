//! The execution capability the queue consumes.
//!
//! The queue never runs a payload itself; it hands the active unit to an
//! [`InjectExecutor`] exactly once and awaits the result.

mod command;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::queue::{ExecutorError, InjectOptions, InjectOutput, InjectPayload};

pub use command::CommandExecutor;

/// Executes one inject.
///
/// Cancellation is cooperative: the queue signals `cancel` and the executor
/// decides how to unwind. Nothing outside the executor ends a running unit.
#[async_trait]
pub trait InjectExecutor: Send + Sync {
    async fn execute(
        &self,
        payload: InjectPayload,
        options: InjectOptions,
        cancel: CancellationToken,
    ) -> Result<InjectOutput, ExecutorError>;
}
