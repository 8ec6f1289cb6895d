//! V1 API handlers.

mod injects;
mod queues;

pub use injects::{cancel_inject, cancel_session, submit_inject};
pub use queues::list_queues;
