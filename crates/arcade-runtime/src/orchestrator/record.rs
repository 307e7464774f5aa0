//! Running instance bookkeeping.

use std::sync::atomic::{AtomicBool, Ordering};

use arcade_core::{InstanceId, Location, OccupantId, RunId, SessionName, TemplateKey};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::behavior::{BehaviorError, SessionBehavior, SessionContext};
use crate::host::EnvironmentHandle;

/// Lifecycle position of a session name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No instance under this name.
    Absent,
    /// Template materialization or mount in progress.
    Creating,
    /// Live and ticking.
    Running,
    /// Live; will close on the next tick.
    CloseRequested,
    /// `close` ran; occupants are being evacuated.
    Closing,
}

impl SessionState {
    /// Whether `get_running_game` returns the record.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::CloseRequested)
    }
}

/// One published instance: its context and its behavior.
///
/// Shared as `Arc<InstanceRecord>`; hooks are only invoked by the
/// orchestrator on the affinity thread.
pub struct InstanceRecord {
    context: SessionContext,
    behavior: Mutex<Box<dyn SessionBehavior>>,
    closed: AtomicBool,
}

impl InstanceRecord {
    pub(crate) fn new(context: SessionContext, behavior: Box<dyn SessionBehavior>) -> Self {
        Self {
            context,
            behavior: Mutex::new(behavior),
            closed: AtomicBool::new(false),
        }
    }

    /// Session name.
    pub fn name(&self) -> &SessionName {
        self.context.name()
    }

    /// Slot id.
    pub fn id(&self) -> InstanceId {
        self.context.id()
    }

    /// Registry key the behavior came from.
    pub fn template(&self) -> &TemplateKey {
        self.context.template()
    }

    /// Mounted environment.
    pub fn environment(&self) -> &EnvironmentHandle {
        self.context.environment()
    }

    /// Incarnation id.
    pub fn run_id(&self) -> &RunId {
        self.context.run_id()
    }

    /// Publication time.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.context.started_at()
    }

    /// Context handed to behavior hooks.
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Whether `close` has been invoked.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn init(&self) -> Result<(), BehaviorError> {
        self.behavior.lock().init(&self.context)
    }

    pub(crate) fn tick(&self) {
        self.behavior.lock().tick(&self.context);
    }

    /// Invokes `close` the first time only; later calls return `Ok`.
    pub(crate) fn close(&self) -> Result<(), BehaviorError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.behavior.lock().close(&self.context)
    }

    pub(crate) fn admit(&self, occupant: &OccupantId) -> bool {
        self.behavior.lock().admit(&self.context, occupant)
    }

    pub(crate) fn position_joining(&self, occupant: &OccupantId, current: &Location) -> Location {
        self.behavior
            .lock()
            .position_joining(&self.context, occupant, current)
    }

    pub(crate) fn add_occupant(&self, occupant: &OccupantId) {
        self.behavior.lock().add_occupant(&self.context, occupant);
    }

    pub(crate) fn remove_occupant(&self, occupant: &OccupantId) {
        self.behavior.lock().remove_occupant(&self.context, occupant);
    }
}

impl std::fmt::Debug for InstanceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceRecord")
            .field("name", self.name())
            .field("id", &self.id())
            .field("environment", &self.environment().key)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
