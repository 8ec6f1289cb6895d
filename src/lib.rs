//! injectq - per-session inject queueing with restart-on-idle draining.
//!
//! Each session key gets its own [`queue::SessionQueue`]: injects for one
//! session run strictly one at a time in priority order, while different
//! sessions run in parallel. [`restart::DrainCoordinator`] watches the
//! fleet and fires a restart only once no inject would be lost.

pub mod api;
pub mod build_info;
pub mod client;
pub mod config;
pub mod executor;
pub mod handlers;
pub mod queue;
pub mod restart;
pub mod server;
