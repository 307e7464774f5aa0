//! The per-name slot map and id allocator, guarded by one lock.

use std::collections::HashMap;
use std::sync::Arc;

use arcade_core::{InstanceId, RunId, SessionName};
use tracing::debug;

use crate::allocator::IdAllocator;
use crate::errors::OrchestratorError;
use crate::orchestrator::pending::{Pending, Resolver};
use crate::orchestrator::record::{InstanceRecord, SessionState};

/// What a session name currently maps to. Absence from the map is
/// [`SessionState::Absent`].
pub(crate) enum Slot {
    Creating {
        id: InstanceId,
    },
    Running(Arc<InstanceRecord>),
    CloseRequested {
        record: Arc<InstanceRecord>,
        waiters: Vec<Resolver<bool>>,
    },
    Closing(Arc<InstanceRecord>),
}

impl Slot {
    pub(crate) fn state(&self) -> SessionState {
        match self {
            Self::Creating { .. } => SessionState::Creating,
            Self::Running(_) => SessionState::Running,
            Self::CloseRequested { .. } => SessionState::CloseRequested,
            Self::Closing(_) => SessionState::Closing,
        }
    }

    pub(crate) fn id(&self) -> InstanceId {
        match self {
            Self::Creating { id } => *id,
            Self::Running(record) | Self::CloseRequested { record, .. } | Self::Closing(record) => {
                record.id()
            }
        }
    }

    /// The record while it still accepts joins, leaves and queries.
    pub(crate) fn live_record(&self) -> Option<&Arc<InstanceRecord>> {
        match self {
            Self::Running(record) | Self::CloseRequested { record, .. } => Some(record),
            Self::Creating { .. } | Self::Closing(_) => None,
        }
    }

    fn record(&self) -> Option<&Arc<InstanceRecord>> {
        match self {
            Self::Running(record) | Self::CloseRequested { record, .. } | Self::Closing(record) => {
                Some(record)
            }
            Self::Creating { .. } => None,
        }
    }
}

/// A close that was requested and has now been claimed by a tick.
pub(crate) struct CloseRequest {
    pub(crate) name: SessionName,
    pub(crate) record: Arc<InstanceRecord>,
    pub(crate) waiters: Vec<Resolver<bool>>,
}

#[derive(Default)]
pub(crate) struct OrchestratorState {
    slots: HashMap<SessionName, Slot>,
    ids: IdAllocator,
    close_queue: Vec<SessionName>,
    shutting_down: bool,
}

impl OrchestratorState {
    /// Insert a `Creating` placeholder under a freshly allocated id.
    pub(crate) fn reserve(&mut self, name: &SessionName) -> Result<InstanceId, OrchestratorError> {
        if self.shutting_down {
            return Err(OrchestratorError::ShuttingDown);
        }
        if self.slots.contains_key(name) {
            return Err(OrchestratorError::DuplicateSession(name.clone()));
        }
        let id = self.ids.allocate();
        let _ = self.slots.insert(name.clone(), Slot::Creating { id });
        Ok(id)
    }

    /// Replace the `Creating` placeholder with the running record.
    pub(crate) fn publish(&mut self, record: &Arc<InstanceRecord>) -> bool {
        let Some(slot) = self.slots.get_mut(record.name()) else {
            return false;
        };
        if !matches!(slot, Slot::Creating { id } if *id == record.id()) {
            return false;
        }
        *slot = Slot::Running(Arc::clone(record));
        true
    }

    /// Remove the slot of `name` if it still holds `id`, and free the id.
    pub(crate) fn retire(&mut self, name: &SessionName, id: InstanceId) -> Option<Slot> {
        if self.slots.get(name).map(Slot::id) != Some(id) {
            return None;
        }
        let slot = self.slots.remove(name);
        let _ = self.ids.release(id);
        self.close_queue.retain(|queued| queued != name);
        slot
    }

    /// Mark `name` for close on the next tick and register a waiter.
    ///
    /// With `run`, only that incarnation is targeted. A second request
    /// before the tick joins the first.
    pub(crate) fn request_close(
        &mut self,
        name: &SessionName,
        run: Option<&RunId>,
    ) -> Result<Pending<bool>, OrchestratorError> {
        if self.shutting_down {
            return Err(OrchestratorError::ShuttingDown);
        }
        let unknown = || OrchestratorError::UnknownSession(name.clone());
        let slot = self.slots.get_mut(name).ok_or_else(unknown)?;
        let record = slot.live_record().ok_or_else(unknown)?;
        if run.is_some_and(|run| run != record.run_id()) {
            return Err(unknown());
        }

        let (tx, pending) = Pending::channel();
        match slot {
            Slot::CloseRequested { waiters, .. } => {
                debug!(session = %name, "close already requested, joining it");
                waiters.push(tx);
            }
            Slot::Running(record) => {
                *slot = Slot::CloseRequested {
                    record: Arc::clone(record),
                    waiters: vec![tx],
                };
                self.close_queue.push(name.clone());
            }
            Slot::Creating { .. } | Slot::Closing(_) => return Err(unknown()),
        }
        Ok(pending)
    }

    /// Claim every queued close, moving those slots to `Closing`.
    pub(crate) fn take_close_requests(&mut self) -> Vec<CloseRequest> {
        let mut claimed = Vec::new();
        for name in std::mem::take(&mut self.close_queue) {
            let Some(slot) = self.slots.remove(&name) else {
                continue;
            };
            match slot {
                Slot::CloseRequested { record, waiters } => {
                    let _ = self
                        .slots
                        .insert(name.clone(), Slot::Closing(Arc::clone(&record)));
                    claimed.push(CloseRequest {
                        name,
                        record,
                        waiters,
                    });
                }
                other => {
                    let _ = self.slots.insert(name, other);
                }
            }
        }
        claimed
    }

    /// Claim every slot for shutdown, leaving the map and allocator empty.
    pub(crate) fn drain_for_shutdown(&mut self) -> Vec<(SessionName, Slot)> {
        self.shutting_down = true;
        self.close_queue.clear();
        self.ids.reset();
        let mut slots: Vec<_> = self.slots.drain().collect();
        slots.sort_by_key(|(_, slot)| slot.id());
        slots
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Whether `name` still holds the `Creating` placeholder for `id`.
    /// False once shutdown drained the map.
    pub(crate) fn holds_placeholder(&self, name: &SessionName, id: InstanceId) -> bool {
        matches!(self.slots.get(name), Some(Slot::Creating { id: held }) if *held == id)
    }

    pub(crate) fn state_of(&self, name: &SessionName) -> SessionState {
        self.slots.get(name).map_or(SessionState::Absent, Slot::state)
    }

    pub(crate) fn live_record(&self, name: &SessionName) -> Option<Arc<InstanceRecord>> {
        self.slots.get(name).and_then(Slot::live_record).cloned()
    }

    pub(crate) fn running_record(&self, name: &SessionName) -> Option<Arc<InstanceRecord>> {
        match self.slots.get(name) {
            Some(Slot::Running(record)) => Some(Arc::clone(record)),
            _ => None,
        }
    }

    /// Running and close-requested records, by id.
    pub(crate) fn live_records(&self) -> Vec<Arc<InstanceRecord>> {
        let mut records: Vec<_> = self
            .slots
            .values()
            .filter_map(Slot::live_record)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.id());
        records
    }

    /// Record whose environment is `key`, including closing ones.
    pub(crate) fn record_for_environment(&self, key: &str) -> Option<(SessionState, Arc<InstanceRecord>)> {
        self.slots.values().find_map(|slot| {
            slot.record()
                .filter(|record| record.environment().key.as_str() == key)
                .map(|record| (slot.state(), Arc::clone(record)))
        })
    }

    pub(crate) fn live_names(&self) -> Vec<SessionName> {
        let mut names: Vec<_> = self
            .slots
            .iter()
            .filter(|(_, slot)| slot.live_record().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    pub(crate) fn used_ids(&self) -> Vec<InstanceId> {
        self.ids.used()
    }

    pub(crate) fn used_id_count(&self) -> usize {
        self.ids.len()
    }
}
