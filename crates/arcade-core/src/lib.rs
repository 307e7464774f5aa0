//! # arcade-core
//!
//! Foundation types shared by every Arcade crate.
//!
//! - **Branded IDs**: `SessionName`, `OccupantId`, `EnvironmentKey`, `RunId` as
//!   newtypes, plus the small integer [`InstanceId`]
//! - **Template keys**: namespaced registry keys (`namespace:path`)
//! - **Locations**: positions inside a host environment
//! - **Logging**: `tracing` subscriber setup and an in-memory capture layer

#![deny(unsafe_code)]

pub mod ids;
pub mod keys;
pub mod location;
pub mod logging;

pub use ids::{EnvironmentKey, InstanceId, OccupantId, RunId, SessionName};
pub use keys::{KeyError, TemplateKey};
pub use location::Location;
