//! Per-session inject queueing.
//!
//! - [`SessionQueue`]: ordered backlog plus single active unit for one session
//! - [`QueueManager`]: session key → queue map, aggregation, reaping
//! - [`QueueEvent`] / [`EventBus`]: lifecycle notifications

mod error;
mod events;
mod manager;
mod session;
mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::{ExecutorError, QueueError, QueueResult};
pub use events::{DEFAULT_EVENT_CAPACITY, EventBus, QueueEvent, QueueEventKind};
pub use manager::{DEFAULT_IDLE_GRACE, DEFAULT_REAP_INTERVAL, QueueManager, QueueManagerConfig};
pub use session::{DEFAULT_MAX_PENDING, InjectHandle, SessionQueue};
pub use types::{
    ActiveInject, INJECT_ID_PREFIX, InjectOptions, InjectOutput, InjectPayload, InjectRequest,
    MediaRef, QueueStats, QueuedInject, StreamCallback, new_unit_id,
};
