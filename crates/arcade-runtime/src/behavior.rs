//! Per-session behavior contract and the context passed to it.

use std::sync::Weak;

use arcade_core::{InstanceId, Location, OccupantId, RunId, SessionName, TemplateKey};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::host::EnvironmentHandle;
use crate::orchestrator::state::OrchestratorState;

/// Failure reported by a behavior hook.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct BehaviorError {
    /// Failure description.
    pub message: String,
}

impl BehaviorError {
    /// Wrap a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Gameplay logic of one session.
///
/// Every hook runs on the affinity thread, never concurrently with another
/// hook of the same instance, and without the orchestrator lock held, so a
/// hook may call [`SessionContext::request_stop`].
pub trait SessionBehavior: Send {
    /// Template directory or archive name this session is built from.
    fn source_template(&self) -> &str;

    /// Called once after the environment is mounted. An error tears the
    /// instance down and fails the start.
    fn init(&mut self, ctx: &SessionContext) -> Result<(), BehaviorError>;

    /// Called once per host scheduling interval while running.
    fn tick(&mut self, ctx: &SessionContext);

    /// Called at most once when the instance is torn down, before occupants
    /// are evacuated.
    fn close(&mut self, ctx: &SessionContext) -> Result<(), BehaviorError>;

    /// Whether `occupant` may join.
    fn admit(&self, _ctx: &SessionContext, _occupant: &OccupantId) -> bool {
        true
    }

    /// Where a joining occupant is placed. The orchestrator centers the
    /// result on its cell and moves it into this session's environment.
    fn position_joining(
        &self,
        _ctx: &SessionContext,
        _occupant: &OccupantId,
        current: &Location,
    ) -> Location {
        current.clone()
    }

    /// A joining occupant has arrived.
    fn add_occupant(&mut self, _ctx: &SessionContext, _occupant: &OccupantId) {}

    /// An occupant is leaving, before being sent home.
    fn remove_occupant(&mut self, _ctx: &SessionContext, _occupant: &OccupantId) {}
}

/// Identity of one running instance, handed to every behavior hook.
#[derive(Clone)]
pub struct SessionContext {
    name: SessionName,
    template: TemplateKey,
    environment: EnvironmentHandle,
    run_id: RunId,
    started_at: DateTime<Utc>,
    state: Weak<Mutex<OrchestratorState>>,
}

impl SessionContext {
    pub(crate) fn new(
        name: SessionName,
        template: TemplateKey,
        environment: EnvironmentHandle,
        state: Weak<Mutex<OrchestratorState>>,
    ) -> Self {
        Self {
            name,
            template,
            environment,
            run_id: RunId::new(),
            started_at: Utc::now(),
            state,
        }
    }

    /// Session name.
    pub fn name(&self) -> &SessionName {
        &self.name
    }

    /// Slot id.
    pub fn id(&self) -> InstanceId {
        self.environment.id
    }

    /// Registry key the behavior was built from.
    pub fn template(&self) -> &TemplateKey {
        &self.template
    }

    /// Mounted environment.
    pub fn environment(&self) -> &EnvironmentHandle {
        &self.environment
    }

    /// Unique id of this incarnation.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// When the instance was published.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Ask the orchestrator to close this instance on the next tick.
    ///
    /// Returns `false` if this incarnation is no longer running (already
    /// closing, replaced, or the orchestrator is gone).
    pub fn request_stop(&self) -> bool {
        let Some(state) = self.state.upgrade() else {
            return false;
        };
        let mut state = state.lock();
        state.request_close(&self.name, Some(&self.run_id)).is_ok()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("name", &self.name)
            .field("template", &self.template)
            .field("environment", &self.environment.key)
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}
