//! Instance orchestrator.
//!
//! - **config**: paths, environment prefix, pool sizing and shutdown grace
//! - **state**: the per-name slot map and id allocator behind one lock
//! - **record**: a running instance (context + behavior)
//! - **pending**: asynchronous results of `start`/`stop`
//! - **orchestrator**: the start/stop/tick/join/leave protocol

mod affinity;
pub mod config;
#[allow(clippy::module_inception)]
pub mod orchestrator;
pub mod pending;
pub mod record;
pub(crate) mod state;
