//! # arcade-runtime
//!
//! Provisioning, lifecycle and teardown of short-lived session instances.
//!
//! - **Allocator**: smallest-free instance ids, reclaimed on teardown
//! - **Worker pool**: bounded background threads for disk I/O only
//! - **Template store**: materializes a template directory or `.zip` archive
//!   into a fresh instance directory
//! - **Behavior / registry / host**: the contracts of the external
//!   collaborators (per-session gameplay, factory lookup, environment host)
//! - **Orchestrator**: the name → instance map and the start/stop/tick
//!   protocol between the worker pool and the affinity thread
//!
//! ## Crate Position
//!
//! Depends on: arcade-core, arcade-settings.

#![deny(unsafe_code)]

pub mod allocator;
pub mod behavior;
pub mod errors;
pub mod host;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod template;

pub use allocator::IdAllocator;
pub use behavior::{BehaviorError, SessionBehavior, SessionContext};
pub use errors::OrchestratorError;
pub use host::{EnvironmentHandle, Host, HostError, Relocation};
pub use orchestrator::config::OrchestratorConfig;
pub use orchestrator::orchestrator::{Orchestrator, ShutdownReport, TickReport};
pub use orchestrator::pending::Pending;
pub use orchestrator::record::{InstanceRecord, SessionState};
pub use pool::{Job, PoolConfig, PoolError, WorkerPool};
pub use registry::{BehaviorFactory, BehaviorRegistry, Registry};
pub use template::{
    Materialized, TemplateLoadCause, TemplateLoadError, TemplateSource, TemplateStore,
};
