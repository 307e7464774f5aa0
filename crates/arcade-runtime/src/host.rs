//! Environment host contract.
//!
//! The host owns environments (mount/unmount), knows where occupants are,
//! and moves them. Every method is called from the affinity thread only.

use std::path::PathBuf;

use arcade_core::{EnvironmentKey, InstanceId, Location, OccupantId};
use futures::future::BoxFuture;

/// Host-side failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HostError {
    /// Failure description.
    pub message: String,
}

impl HostError {
    /// Wrap a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Identifies one instance environment: its key, slot and backing directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EnvironmentHandle {
    /// Host-level environment identifier (`<prefix><id>`).
    pub key: EnvironmentKey,
    /// Slot the environment belongs to.
    pub id: InstanceId,
    /// Directory the environment was materialized into.
    pub path: PathBuf,
}

/// Asynchronous relocation issued by the host.
///
/// Polled on the affinity thread at tick boundaries with a no-op waker; it
/// must make progress without a tokio context. Every unsettled relocation
/// is polled again on each tick, so implementations may turn ready without
/// waking. Wake the waker anyway when the future is also awaited elsewhere:
/// combinators such as `join_all` skip futures that did not wake.
pub type Relocation = BoxFuture<'static, Result<(), HostError>>;

/// The environment host.
pub trait Host: Send + Sync {
    /// Load the environment stored at `env.path` under `env.key`.
    fn mount(&self, env: &EnvironmentHandle) -> Result<(), HostError>;

    /// Unload the environment. Its directory is deleted afterwards.
    fn unmount(&self, env: &EnvironmentHandle) -> Result<(), HostError>;

    /// Occupants currently inside the environment.
    fn occupants(&self, env: &EnvironmentHandle) -> Vec<OccupantId>;

    /// Current location of an occupant, `None` if unknown to the host.
    fn location_of(&self, occupant: &OccupantId) -> Option<Location>;

    /// Start moving an occupant.
    fn relocate(&self, occupant: &OccupantId, to: Location) -> Relocation;

    /// The shared home location occupants return to.
    fn home(&self) -> Location;
}
