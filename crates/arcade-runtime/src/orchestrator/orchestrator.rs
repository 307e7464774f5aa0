//! Instance lifecycle coordinator.
//!
//! `start` and `stop` may be called from any thread; they only touch the
//! slot map under its lock and queue work. Everything that mutates the host
//! or runs behavior hooks happens on the affinity thread (the thread that
//! built the orchestrator) inside [`Orchestrator::tick`], [`join`],
//! [`leave`], the occupancy hooks and [`shutdown`].
//!
//! Background results and host relocations are consumed by polling at tick
//! boundaries, so a continuation never runs concurrently with the tick's
//! own map mutation.
//!
//! [`join`]: Orchestrator::join
//! [`leave`]: Orchestrator::leave
//! [`shutdown`]: Orchestrator::shutdown

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};

use arcade_core::{EnvironmentKey, InstanceId, OccupantId, RunId, SessionName, TemplateKey};
use futures::FutureExt;
use futures::future::{MaybeDone, maybe_done};
use futures::task::noop_waker_ref;
use parking_lot::Mutex;
use tracing::{debug, error, info, instrument, warn};

use super::affinity::Affinity;
use super::config::OrchestratorConfig;
use super::pending::{Pending, Resolver};
use super::record::{InstanceRecord, SessionState};
use super::state::{CloseRequest, OrchestratorState, Slot};
use crate::behavior::{SessionBehavior, SessionContext};
use crate::errors::OrchestratorError;
use crate::host::{EnvironmentHandle, Host, HostError, Relocation};
use crate::pool::{Job, PoolError, WorkerPool};
use crate::registry::Registry;
use crate::template::{Materialized, TemplateLoadError, TemplateStore, remove_dir_if_exists};

/// What one [`Orchestrator::tick`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Starts that completed and published a running instance.
    pub started: usize,
    /// Starts that failed after materialization was scheduled.
    pub failed_starts: usize,
    /// Instances fully torn down.
    pub closed: usize,
    /// Live instances whose `tick` hook ran, including ones whose stop
    /// arrived after this tick drained the close queue.
    pub ticked: usize,
}

/// What [`Orchestrator::shutdown`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Instances closed.
    pub closed: usize,
    /// Starts failed with `ShuttingDown` before they were published.
    pub abandoned_starts: usize,
    /// Whether every background job finished within the grace period.
    pub drained: bool,
}

type Materialization = Result<Materialized, TemplateLoadError>;

/// A start waiting for its template to be materialized.
struct Provisioning {
    name: SessionName,
    template: TemplateKey,
    environment: EnvironmentHandle,
    behavior: Box<dyn SessionBehavior>,
    job: Job<Materialization>,
    handoff: Handoff,
    done: Resolver<Arc<InstanceRecord>>,
}

/// Decides who removes the directory of a start that is given up: the
/// orchestrator when materialization already returned, otherwise the
/// materialization job once it does.
#[derive(Clone, Default)]
struct Handoff(Arc<AtomicU8>);

impl Handoff {
    const RUNNING: u8 = 0;
    const FINISHED: u8 = 1;
    const ABANDONED: u8 = 2;

    /// Job side. `false` if the start was abandoned meanwhile.
    fn finish(&self) -> bool {
        self.0
            .compare_exchange(Self::RUNNING, Self::FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Orchestrator side. `true` if the job already returned, so the
    /// directory is the caller's to remove.
    fn abandon(&self) -> bool {
        self.0
            .compare_exchange(Self::RUNNING, Self::ABANDONED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
    }
}

/// Body of the materialization job.
fn materialize_for_start(
    store: &TemplateStore,
    source: &str,
    destination: &Path,
    handoff: &Handoff,
) -> Materialization {
    let result = store.materialize(source, destination);
    if !handoff.finish() {
        debug!(destination = %destination.display(), "start abandoned during materialization, removing");
        if let Err(e) = remove_dir_if_exists(destination) {
            warn!(destination = %destination.display(), error = %e, "could not remove abandoned instance directory");
        }
    }
    result
}

/// A join relocation; `add_occupant` runs once it settles.
struct Arrival {
    name: SessionName,
    run_id: RunId,
    occupant: OccupantId,
    relocation: Relocation,
}

/// A closed instance whose occupants are being sent home.
struct Evacuation {
    name: SessionName,
    record: Arc<InstanceRecord>,
    waiters: Vec<Resolver<bool>>,
    close_error: Option<String>,
    occupants: Vec<OccupantId>,
    relocations: Vec<MaybeDone<Relocation>>,
}

impl Evacuation {
    /// Poll every unsettled relocation. Each one is polled on every call,
    /// so a relocation that became ready without waking is still seen.
    fn poll_relocations(&mut self, cx: &mut Context<'_>) -> bool {
        let mut settled = true;
        for relocation in &mut self.relocations {
            settled &= relocation.poll_unpin(cx).is_ready();
        }
        settled
    }

    /// Outcomes in occupant order; unsettled relocations count as failed.
    fn take_results(&mut self) -> Vec<Result<(), HostError>> {
        self.relocations
            .iter_mut()
            .map(|relocation| {
                Pin::new(relocation)
                    .take_output()
                    .unwrap_or_else(|| Err(HostError::new("relocation abandoned")))
            })
            .collect()
    }
}

/// Work only the affinity thread touches.
#[derive(Default)]
struct AffinityQueues {
    arrivals: Vec<Arrival>,
    evacuations: Vec<Evacuation>,
    returns: Vec<(OccupantId, Relocation)>,
    housekeeping: Vec<Job<io::Result<()>>>,
}

/// Owns the name → instance map and drives every instance through
/// creating → running → closing → absent.
pub struct Orchestrator {
    config: OrchestratorConfig,
    state: Arc<Mutex<OrchestratorState>>,
    provisioning: Mutex<Vec<Provisioning>>,
    queues: Mutex<AffinityQueues>,
    registry: Arc<dyn Registry>,
    host: Arc<dyn Host>,
    store: TemplateStore,
    pool: WorkerPool,
    affinity: Affinity,
}

impl Orchestrator {
    /// Build an orchestrator bound to the calling thread.
    ///
    /// The template store root is created in the background if missing.
    pub fn new(
        config: OrchestratorConfig,
        registry: Arc<dyn Registry>,
        host: Arc<dyn Host>,
    ) -> Result<Self, OrchestratorError> {
        let pool = WorkerPool::new(&config.workers)?;
        let store = TemplateStore::new(config.template_root.clone());

        let root = store.clone();
        let ensure_root = pool.submit("ensure template root", move || root.ensure_root());

        info!(
            templates = %config.template_root.display(),
            instances = %config.instance_root.display(),
            prefix = %config.environment_prefix,
            workers = pool.threads(),
            "orchestrator ready"
        );

        Ok(Self {
            config,
            state: Arc::new(Mutex::new(OrchestratorState::default())),
            provisioning: Mutex::new(Vec::new()),
            queues: Mutex::new(AffinityQueues {
                housekeeping: vec![ensure_root],
                ..AffinityQueues::default()
            }),
            registry,
            host,
            store,
            pool,
            affinity: Affinity::current(),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Provision a new instance of `template` under `name`.
    ///
    /// Resolves on a later tick once the environment is mounted and the
    /// behavior's `init` succeeded. Duplicate names and unknown templates
    /// fail immediately without scheduling background work.
    #[instrument(skip_all, fields(session = %name, template = %template))]
    pub fn start(&self, name: SessionName, template: TemplateKey) -> Pending<Arc<InstanceRecord>> {
        let reserved = self.state.lock().reserve(&name);
        let id = match reserved {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "start rejected");
                record_start(Some(&e));
                return Pending::failed(e);
            }
        };

        let Some(factory) = self.registry.resolve_factory(&template) else {
            let _ = self.state.lock().retire(&name, id);
            let e = OrchestratorError::UnknownTemplate(template);
            warn!(error = %e, "start rejected");
            record_start(Some(&e));
            return Pending::failed(e);
        };
        let behavior = factory();

        let environment = self.config.environment_for(id);
        let source = behavior.source_template().to_string();
        let store = self.store.clone();
        let destination = environment.path.clone();
        let handoff = Handoff::default();
        let job_handoff = handoff.clone();
        let job = self.pool.submit(
            format!("materialize {source} into {}", environment.key),
            move || materialize_for_start(&store, &source, &destination, &job_handoff),
        );

        let (done, pending) = Pending::channel();
        {
            // Publish under the state lock so shutdown either sees this
            // entry or has already drained the placeholder.
            let state = self.state.lock();
            if !state.is_shutting_down() && state.holds_placeholder(&name, id) {
                debug!(id = %id, environment = %environment.key, "materialization scheduled");
                self.provisioning.lock().push(Provisioning {
                    name,
                    template,
                    environment,
                    behavior,
                    job,
                    handoff,
                    done,
                });
                drop(state);
                self.update_live_gauge();
                return pending;
            }
        }

        let e = OrchestratorError::ShuttingDown;
        warn!(error = %e, "start overtaken by shutdown");
        self.abandon_provisioning(&environment, &handoff);
        record_start(Some(&e));
        Pending::failed(e)
    }

    /// Request teardown of `name` on the next tick.
    ///
    /// Fails with `UnknownSession` if the name is absent, still creating,
    /// or already being evacuated. A second stop before the tick shares the
    /// first one's outcome.
    #[instrument(skip_all, fields(session = %name))]
    pub fn stop(&self, name: &SessionName) -> Pending<bool> {
        let requested = self.state.lock().request_close(name, None);
        match requested {
            Ok(pending) => {
                info!("stop requested");
                pending
            }
            Err(e) => {
                debug!(error = %e, "stop rejected");
                Pending::failed(e)
            }
        }
    }

    /// One host scheduling interval.
    ///
    /// Completes finished starts, settles join and evacuation relocations,
    /// closes every instance whose stop was requested, then ticks every
    /// instance that is still live.
    #[instrument(level = "trace", skip_all)]
    pub fn tick(&self) -> Result<TickReport, OrchestratorError> {
        self.affinity.check("tick")?;
        let mut report = TickReport::default();

        self.settle_provisioning(&mut report);
        self.settle_arrivals();

        let requests = self.state.lock().take_close_requests();
        for request in requests {
            self.begin_close(request);
        }
        report.closed = self.settle_evacuations();

        self.settle_returns();
        self.settle_housekeeping();

        let running = self.state.lock().live_records();
        for record in &running {
            record.tick();
        }
        report.ticked = running.len();
        Ok(report)
    }

    /// Close every instance, fail pending starts and stop the worker pool.
    ///
    /// Relocations that have not settled by the time they are polled are
    /// abandoned. Later `start`/`stop` calls fail with `ShuttingDown`.
    #[instrument(skip_all)]
    pub fn shutdown(&self) -> Result<ShutdownReport, OrchestratorError> {
        self.affinity.check("shutdown")?;
        let slots = self.state.lock().drain_for_shutdown();
        info!(instances = slots.len(), "orchestrator shutting down");

        for (name, slot) in slots {
            let (record, waiters) = match slot {
                Slot::Running(record) => (record, Vec::new()),
                Slot::CloseRequested { record, waiters } => (record, waiters),
                // Creating: owned by its provisioning entry. Closing: already evacuating.
                Slot::Creating { .. } | Slot::Closing(_) => continue,
            };
            self.begin_close(CloseRequest {
                name,
                record,
                waiters,
            });
        }

        let mut report = ShutdownReport::default();
        let evacuations = std::mem::take(&mut self.queues.lock().evacuations);
        let mut cx = Context::from_waker(noop_waker_ref());
        for mut evacuation in evacuations {
            if !evacuation.poll_relocations(&mut cx) {
                warn!(session = %evacuation.name, "abandoning unsettled evacuation");
            }
            let results = evacuation.take_results();
            self.finish_close(evacuation, &results);
            report.closed += 1;
        }

        {
            let mut queues = self.queues.lock();
            queues.arrivals.clear();
            queues.returns.clear();
        }

        let provisioning = std::mem::take(&mut *self.provisioning.lock());
        report.drained = self.pool.shutdown(self.config.shutdown_grace);
        report.abandoned_starts = provisioning.len();
        for entry in provisioning {
            debug!(session = %entry.name, "failing pending start");
            self.abandon_provisioning(&entry.environment, &entry.handoff);
            record_start(Some(&OrchestratorError::ShuttingDown));
            let _ = entry.done.send(Err(OrchestratorError::ShuttingDown));
        }
        self.settle_housekeeping();
        self.update_live_gauge();

        info!(
            closed = report.closed,
            abandoned_starts = report.abandoned_starts,
            drained = report.drained,
            "orchestrator stopped"
        );
        Ok(report)
    }

    // ── Occupants ───────────────────────────────────────────────────────

    /// Move `occupant` into the running instance `name`.
    ///
    /// Returns `false` without side effects if the behavior refuses them.
    /// Otherwise the occupant is relocated to the behavior's chosen
    /// position (centered on its cell) and `add_occupant` runs once the
    /// relocation settles, unless the instance closed in the meantime.
    #[instrument(skip_all, fields(session = %name, occupant = %occupant))]
    pub fn join(&self, name: &SessionName, occupant: &OccupantId) -> Result<bool, OrchestratorError> {
        self.affinity.check("join")?;
        let record = {
            let state = self.state.lock();
            if state.is_shutting_down() {
                return Err(OrchestratorError::ShuttingDown);
            }
            state.running_record(name)
        }
        .ok_or_else(|| OrchestratorError::UnknownSession(name.clone()))?;

        if !record.admit(occupant) {
            debug!("join refused by behavior");
            return Ok(false);
        }
        let current = self
            .host
            .location_of(occupant)
            .ok_or_else(|| OrchestratorError::UnknownOccupant(occupant.clone()))?;
        let target = record
            .position_joining(occupant, &current)
            .cell_centered()
            .in_environment(record.environment().key.clone());

        debug!(x = target.x, y = target.y, z = target.z, "relocating joining occupant");
        let relocation = self.host.relocate(occupant, target);
        self.queues.lock().arrivals.push(Arrival {
            name: name.clone(),
            run_id: record.run_id().clone(),
            occupant: occupant.clone(),
            relocation,
        });
        self.settle_arrivals();
        Ok(true)
    }

    /// Take `occupant` out of instance `name` and send them home.
    ///
    /// Returns `false` if the occupant is not inside the instance's
    /// environment.
    #[instrument(skip_all, fields(session = %name, occupant = %occupant))]
    pub fn leave(&self, name: &SessionName, occupant: &OccupantId) -> Result<bool, OrchestratorError> {
        self.affinity.check("leave")?;
        let record = self
            .state
            .lock()
            .live_record(name)
            .ok_or_else(|| OrchestratorError::UnknownSession(name.clone()))?;
        Ok(self.evict(&record, occupant))
    }

    /// Host hook: an occupant connected. Anyone who appears inside an
    /// instance environment (live, closing or stale) is sent home.
    pub fn occupant_connected(&self, occupant: &OccupantId) -> Result<bool, OrchestratorError> {
        self.affinity.check("occupant_connected")?;
        let Some(location) = self.host.location_of(occupant) else {
            return Ok(false);
        };
        let key = location.environment.as_str();
        let tracked = self.state.lock().record_for_environment(key).is_some();
        if !tracked && !self.config.is_instance_environment(key) {
            return Ok(false);
        }
        info!(occupant = %occupant, environment = key, "occupant connected inside an instance, sending home");
        self.send_home(occupant);
        Ok(true)
    }

    /// Host hook: an occupant disconnected. If they were inside a live
    /// instance they leave it; returns that instance's name.
    pub fn occupant_disconnected(
        &self,
        occupant: &OccupantId,
    ) -> Result<Option<SessionName>, OrchestratorError> {
        self.affinity.check("occupant_disconnected")?;
        let Some(location) = self.host.location_of(occupant) else {
            return Ok(None);
        };
        let record = self
            .state
            .lock()
            .record_for_environment(location.environment.as_str())
            .filter(|(state, _)| state.is_live())
            .map(|(_, record)| record);
        let Some(record) = record else {
            return Ok(None);
        };
        Ok(self
            .evict(&record, occupant)
            .then(|| record.name().clone()))
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// The running or close-requested record under `name`.
    pub fn get_running_game(&self, name: &SessionName) -> Option<Arc<InstanceRecord>> {
        self.state.lock().live_record(name)
    }

    /// Names of running and close-requested instances, sorted.
    pub fn get_running_games(&self) -> Vec<SessionName> {
        self.state.lock().live_names()
    }

    /// Running and close-requested records, by id.
    pub fn running_records(&self) -> Vec<Arc<InstanceRecord>> {
        self.state.lock().live_records()
    }

    /// The live record mounted as environment `key`.
    pub fn find_by_environment(&self, key: &EnvironmentKey) -> Option<Arc<InstanceRecord>> {
        self.state
            .lock()
            .record_for_environment(key.as_str())
            .filter(|(state, _)| state.is_live())
            .map(|(_, record)| record)
    }

    /// Lifecycle position of `name`.
    pub fn session_state(&self, name: &SessionName) -> SessionState {
        self.state.lock().state_of(name)
    }

    /// Ids held by creating, running and closing instances.
    pub fn live_ids(&self) -> Vec<InstanceId> {
        self.state.lock().used_ids()
    }

    /// Starts still waiting on materialization or mount.
    pub fn pending_starts(&self) -> usize {
        self.provisioning.lock().len()
    }

    /// Template keys the registry can build.
    pub fn template_keys(&self) -> BTreeSet<TemplateKey> {
        self.registry.list_keys()
    }

    /// Resolved configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Template store.
    pub fn store(&self) -> &TemplateStore {
        &self.store
    }

    /// Background worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    // ── Start continuation ──────────────────────────────────────────────

    fn settle_provisioning(&self, report: &mut TickReport) {
        let entries = std::mem::take(&mut *self.provisioning.lock());
        if entries.is_empty() {
            return;
        }
        let mut waiting = Vec::new();
        for mut entry in entries {
            let Some(materialized) = entry.job.try_take() else {
                waiting.push(entry);
                continue;
            };
            let Provisioning {
                name,
                template,
                environment,
                behavior,
                done,
                ..
            } = entry;
            let outcome = self.complete_start(name, template, environment, behavior, materialized);
            match &outcome {
                Ok(_) => report.started += 1,
                Err(_) => report.failed_starts += 1,
            }
            record_start(outcome.as_ref().err());
            let _ = done.send(outcome);
        }
        requeue(&mut *self.provisioning.lock(), waiting);
        self.update_live_gauge();
    }

    fn complete_start(
        &self,
        name: SessionName,
        template: TemplateKey,
        environment: EnvironmentHandle,
        behavior: Box<dyn SessionBehavior>,
        materialized: Result<Materialization, PoolError>,
    ) -> Result<Arc<InstanceRecord>, OrchestratorError> {
        let materialized = match materialized {
            Ok(Ok(materialized)) => materialized,
            Ok(Err(e)) => return Err(self.abort_start(&name, &environment, e.into())),
            Err(e) => return Err(self.abort_start(&name, &environment, e.into())),
        };
        if self.state.lock().is_shutting_down() {
            return Err(self.abort_start(&name, &environment, OrchestratorError::ShuttingDown));
        }
        if let Err(source) = self.host.mount(&environment) {
            let e = OrchestratorError::EnvironmentMount {
                name: name.clone(),
                source,
            };
            return Err(self.abort_start(&name, &environment, e));
        }

        let context = SessionContext::new(
            name.clone(),
            template,
            environment.clone(),
            Arc::downgrade(&self.state),
        );
        let record = Arc::new(InstanceRecord::new(context, behavior));
        if !self.state.lock().publish(&record) {
            self.unmount_and_discard(&environment);
            return Err(OrchestratorError::ShuttingDown);
        }

        if let Err(source) = record.init() {
            error!(session = %name, error = %source, "init failed, tearing instance down");
            self.unmount_and_discard(&environment);
            let slot = self.state.lock().retire(&name, environment.id);
            if let Some(Slot::CloseRequested { waiters, .. }) = slot {
                for waiter in waiters {
                    let _ = waiter.send(Err(OrchestratorError::CloseFailed {
                        name: name.clone(),
                        message: "session failed to initialize".to_string(),
                    }));
                }
            }
            return Err(OrchestratorError::SessionInit { name, source });
        }

        info!(
            session = %name,
            id = %environment.id,
            environment = %environment.key,
            run_id = %record.run_id(),
            source = materialized.source.kind(),
            files = materialized.files,
            "instance running"
        );
        Ok(record)
    }

    /// Undo a start that never published: delete the directory, free the
    /// name and id.
    fn abort_start(
        &self,
        name: &SessionName,
        environment: &EnvironmentHandle,
        error: OrchestratorError,
    ) -> OrchestratorError {
        warn!(session = %name, id = %environment.id, error = %error, "start failed");
        self.discard_directory(environment);
        let _ = self.state.lock().retire(name, environment.id);
        error
    }

    // ── Close continuation ──────────────────────────────────────────────

    fn begin_close(&self, request: CloseRequest) {
        let CloseRequest {
            name,
            record,
            waiters,
        } = request;
        info!(session = %name, id = %record.id(), "closing instance");

        let close_error = record.close().err().map(|e| {
            error!(session = %name, error = %e, "close hook failed");
            e.to_string()
        });

        let home = self.host.home();
        let occupants = self.host.occupants(record.environment());
        let relocations: Vec<Relocation> = occupants
            .iter()
            .map(|occupant| self.host.relocate(occupant, home.clone()))
            .collect();
        debug!(session = %name, occupants = occupants.len(), "evacuating");

        self.queues.lock().evacuations.push(Evacuation {
            name,
            record,
            waiters,
            close_error,
            occupants,
            relocations: relocations.into_iter().map(maybe_done).collect(),
        });
    }

    fn settle_evacuations(&self) -> usize {
        let evacuations = std::mem::take(&mut self.queues.lock().evacuations);
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut waiting = Vec::new();
        let mut closed = 0;
        for mut evacuation in evacuations {
            if evacuation.poll_relocations(&mut cx) {
                let results = evacuation.take_results();
                self.finish_close(evacuation, &results);
                closed += 1;
            } else {
                waiting.push(evacuation);
            }
        }
        requeue(&mut self.queues.lock().evacuations, waiting);
        closed
    }

    /// Unmount, schedule deletion, free name and id, resolve waiters.
    fn finish_close(&self, evacuation: Evacuation, relocations: &[Result<(), HostError>]) {
        let Evacuation {
            name,
            record,
            waiters,
            close_error,
            occupants,
            ..
        } = evacuation;

        for (occupant, result) in occupants.iter().zip(relocations) {
            if let Err(e) = result {
                warn!(session = %name, occupant = %occupant, error = %e, "evacuation relocation failed");
            }
        }

        let environment = record.environment();
        let mut failures = Vec::new();
        if let Some(e) = close_error {
            failures.push(format!("close: {e}"));
        }
        match self.host.unmount(environment) {
            Ok(()) => self.discard_directory(environment),
            Err(e) => {
                error!(
                    session = %name,
                    environment = %environment.key,
                    error = %e,
                    "unmount failed, leaving instance directory in place"
                );
                failures.push(format!("unmount: {e}"));
            }
        }

        let _ = self.state.lock().retire(&name, environment.id);
        self.update_live_gauge();
        metrics::counter!("arcade_instance_stops_total").increment(1);

        let failure = (!failures.is_empty()).then(|| failures.join("; "));
        match &failure {
            None => info!(session = %name, id = %environment.id, "instance closed"),
            Some(errors) => warn!(session = %name, id = %environment.id, errors = %errors, "instance closed with errors"),
        }
        for waiter in waiters {
            let outcome = match &failure {
                None => Ok(true),
                Some(message) => Err(OrchestratorError::CloseFailed {
                    name: name.clone(),
                    message: message.clone(),
                }),
            };
            let _ = waiter.send(outcome);
        }
    }

    // ── Occupant continuations ──────────────────────────────────────────

    fn settle_arrivals(&self) {
        let arrivals = std::mem::take(&mut self.queues.lock().arrivals);
        if arrivals.is_empty() {
            return;
        }
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut waiting = Vec::new();
        for mut arrival in arrivals {
            match arrival.relocation.poll_unpin(&mut cx) {
                Poll::Pending => waiting.push(arrival),
                Poll::Ready(Err(e)) => {
                    warn!(session = %arrival.name, occupant = %arrival.occupant, error = %e, "join relocation failed");
                }
                Poll::Ready(Ok(())) => {
                    let record = self
                        .state
                        .lock()
                        .live_record(&arrival.name)
                        .filter(|record| record.run_id() == &arrival.run_id);
                    match record {
                        Some(record) => {
                            record.add_occupant(&arrival.occupant);
                            debug!(session = %arrival.name, occupant = %arrival.occupant, "occupant arrived");
                        }
                        None => {
                            debug!(session = %arrival.name, occupant = %arrival.occupant, "session gone before arrival, sending home");
                            self.send_home(&arrival.occupant);
                        }
                    }
                }
            }
        }
        requeue(&mut self.queues.lock().arrivals, waiting);
    }

    fn evict(&self, record: &InstanceRecord, occupant: &OccupantId) -> bool {
        let inside = self
            .host
            .location_of(occupant)
            .is_some_and(|location| location.environment == record.environment().key);
        if !inside {
            debug!(session = %record.name(), occupant = %occupant, "occupant not inside instance");
            return false;
        }
        record.remove_occupant(occupant);
        self.send_home(occupant);
        info!(session = %record.name(), occupant = %occupant, "occupant left");
        true
    }

    fn send_home(&self, occupant: &OccupantId) {
        let relocation = self.host.relocate(occupant, self.host.home());
        self.queues.lock().returns.push((occupant.clone(), relocation));
        self.settle_returns();
    }

    fn settle_returns(&self) {
        let returns = std::mem::take(&mut self.queues.lock().returns);
        if returns.is_empty() {
            return;
        }
        let mut cx = Context::from_waker(noop_waker_ref());
        let mut waiting = Vec::new();
        for (occupant, mut relocation) in returns {
            match relocation.poll_unpin(&mut cx) {
                Poll::Pending => waiting.push((occupant, relocation)),
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => {
                    warn!(occupant = %occupant, error = %e, "return home failed");
                }
            }
        }
        requeue(&mut self.queues.lock().returns, waiting);
    }

    // ── Directories ─────────────────────────────────────────────────────

    fn unmount_and_discard(&self, environment: &EnvironmentHandle) {
        match self.host.unmount(environment) {
            Ok(()) => self.discard_directory(environment),
            Err(e) => error!(
                environment = %environment.key,
                error = %e,
                "unmount failed, leaving instance directory in place"
            ),
        }
    }

    /// Drop a start that was never published. The directory is left to the
    /// materialization job if that is still running.
    fn abandon_provisioning(&self, environment: &EnvironmentHandle, handoff: &Handoff) {
        if handoff.abandon() {
            self.discard_directory(environment);
        } else {
            warn!(
                environment = %environment.key,
                "materialization still running, its job removes the directory"
            );
        }
    }

    /// Move the instance directory aside, then delete it on the pool.
    ///
    /// The rename frees `<prefix><id>` at once, so a start that reuses the
    /// id cannot race the deletion.
    fn discard_directory(&self, environment: &EnvironmentHandle) {
        let target = match tombstone(environment) {
            Ok(Some(tombstone)) => tombstone,
            Ok(None) => return,
            Err(e) => {
                warn!(
                    path = %environment.path.display(),
                    error = %e,
                    "could not move instance directory aside, deleting in place"
                );
                environment.path.clone()
            }
        };
        let job = self.pool.submit(
            format!("delete {}", target.display()),
            move || remove_dir_if_exists(&target).map(|_| ()),
        );
        self.queues.lock().housekeeping.push(job);
        self.settle_housekeeping();
    }

    fn settle_housekeeping(&self) {
        let jobs = std::mem::take(&mut self.queues.lock().housekeeping);
        if jobs.is_empty() {
            return;
        }
        let mut waiting = Vec::new();
        for mut job in jobs {
            match job.try_take() {
                None => waiting.push(job),
                Some(Ok(Ok(()))) => debug!(label = job.label(), "background job finished"),
                Some(Ok(Err(e))) => warn!(label = job.label(), error = %e, "background job failed"),
                Some(Err(e)) => error!(error = %e, "background job lost"),
            }
        }
        requeue(&mut self.queues.lock().housekeeping, waiting);
    }

    #[allow(clippy::cast_precision_loss)]
    fn update_live_gauge(&self) {
        let live = self.state.lock().used_id_count();
        metrics::gauge!("arcade_instances_live").set(live as f64);
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("instance_root", &self.config.instance_root)
            .field("running", &self.get_running_games())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

fn record_start(error: Option<&OrchestratorError>) {
    let outcome = error.map_or("ok", OrchestratorError::category);
    metrics::counter!("arcade_instance_starts_total", "outcome" => outcome).increment(1);
}

/// Put still-pending items back in front of anything queued meanwhile.
fn requeue<T>(queue: &mut Vec<T>, mut waiting: Vec<T>) {
    if waiting.is_empty() {
        return;
    }
    waiting.append(queue);
    *queue = waiting;
}

/// Rename an instance directory to a unique hidden sibling. `None` if there
/// was nothing to move.
fn tombstone(environment: &EnvironmentHandle) -> io::Result<Option<PathBuf>> {
    let tombstone = environment
        .path
        .with_file_name(format!(".{}.{}.trash", environment.key, RunId::new()));
    match std::fs::rename(&environment.path, &tombstone) {
        Ok(()) => Ok(Some(tombstone)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}
