//! Scripted executor shared by the queue unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{ExecutorError, InjectOptions, InjectOutput, InjectPayload};
use crate::executor::InjectExecutor;

/// Executor whose runs are released one permit at a time by the test.
///
/// Payload text drives behavior: `"fail"` returns an error, `"panic"`
/// panics, `"stubborn"` ignores cancellation; anything else echoes back.
/// Every run waits for a gate permit or its cancellation token.
pub struct GatedExecutor {
    gate: Semaphore,
    started: Mutex<Vec<String>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    calls: AtomicUsize,
}

impl GatedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            started: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    /// Let `n` runs finish.
    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InjectExecutor for GatedExecutor {
    async fn execute(
        &self,
        payload: InjectPayload,
        _options: InjectOptions,
        cancel: CancellationToken,
    ) -> Result<InjectOutput, ExecutorError> {
        let text = payload.as_text().to_string();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().unwrap().push(text.clone());
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let cancelled = if text == "stubborn" {
            self.gate.acquire().await.unwrap().forget();
            false
        } else {
            tokio::select! {
                permit = self.gate.acquire() => {
                    permit.unwrap().forget();
                    false
                }
                _ = cancel.cancelled() => true,
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);

        if cancelled {
            return Err("stopped".into());
        }
        match text.as_str() {
            "fail" => Err("boom".into()),
            "panic" => panic!("executor exploded"),
            _ => Ok(InjectOutput::text(format!("done:{text}"))),
        }
    }
}
