//! Shared fixtures: an in-memory host, a scripted behavior and a zip writer.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::Poll;
use std::time::Duration;

use arcade_core::{EnvironmentKey, Location, OccupantId, SessionName, TemplateKey};
use arcade_runtime::{
    BehaviorError, BehaviorRegistry, EnvironmentHandle, Host, HostError, InstanceRecord,
    Orchestrator, OrchestratorConfig, OrchestratorError, Pending, PoolConfig, Registry,
    Relocation, SessionBehavior, SessionContext,
};
use futures::FutureExt;
use parking_lot::Mutex;

// ─────────────────────────────────────────────────────────────────────────────
// Host
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct HostState {
    mounted: BTreeSet<EnvironmentKey>,
    locations: HashMap<OccupantId, Location>,
    held: Vec<(OccupantId, Location, Arc<AtomicBool>)>,
    hold_relocations: bool,
    fail_mount: bool,
    fail_unmount: bool,
    relocations: usize,
}

/// Host that keeps environments and occupant positions in memory.
///
/// Relocations apply immediately unless held, in which case they settle on
/// [`FakeHost::release`]. Held relocations never wake their waker; they
/// only report ready when polled again.
#[derive(Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    pub fn home_location() -> Location {
        Location::new("lobby", 0.5, 64.0, 0.5)
    }

    pub fn place(&self, occupant: &str, location: Location) {
        let _ = self
            .state
            .lock()
            .locations
            .insert(OccupantId::from(occupant), location);
    }

    pub fn forget(&self, occupant: &str) {
        let _ = self.state.lock().locations.remove(&OccupantId::from(occupant));
    }

    pub fn location(&self, occupant: &str) -> Option<Location> {
        self.state
            .lock()
            .locations
            .get(&OccupantId::from(occupant))
            .cloned()
    }

    pub fn is_mounted(&self, key: &str) -> bool {
        self.state.lock().mounted.contains(&EnvironmentKey::from(key))
    }

    pub fn mounted_count(&self) -> usize {
        self.state.lock().mounted.len()
    }

    pub fn relocation_count(&self) -> usize {
        self.state.lock().relocations
    }

    pub fn hold_relocations(&self, hold: bool) {
        self.state.lock().hold_relocations = hold;
    }

    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Settle every held relocation.
    pub fn release(&self) {
        let held = std::mem::take(&mut self.state.lock().held);
        for (occupant, to, settled) in held {
            let _ = self.state.lock().locations.insert(occupant, to);
            settled.store(true, Ordering::Release);
        }
    }

    pub fn fail_mount(&self, fail: bool) {
        self.state.lock().fail_mount = fail;
    }

    pub fn fail_unmount(&self, fail: bool) {
        self.state.lock().fail_unmount = fail;
    }
}

impl Host for FakeHost {
    fn mount(&self, env: &EnvironmentHandle) -> Result<(), HostError> {
        let mut state = self.state.lock();
        if state.fail_mount {
            return Err(HostError::new("mount refused"));
        }
        if !env.path.join("level.dat").is_file() {
            return Err(HostError::new(format!("no level.dat in {}", env.path.display())));
        }
        let _ = state.mounted.insert(env.key.clone());
        Ok(())
    }

    fn unmount(&self, env: &EnvironmentHandle) -> Result<(), HostError> {
        let mut state = self.state.lock();
        if state.fail_unmount {
            return Err(HostError::new("unmount refused"));
        }
        if state.mounted.remove(&env.key) {
            Ok(())
        } else {
            Err(HostError::new(format!("{} is not mounted", env.key)))
        }
    }

    fn occupants(&self, env: &EnvironmentHandle) -> Vec<OccupantId> {
        let mut occupants: Vec<_> = self
            .state
            .lock()
            .locations
            .iter()
            .filter(|(_, location)| location.environment == env.key)
            .map(|(occupant, _)| occupant.clone())
            .collect();
        occupants.sort();
        occupants
    }

    fn location_of(&self, occupant: &OccupantId) -> Option<Location> {
        self.state.lock().locations.get(occupant).cloned()
    }

    fn relocate(&self, occupant: &OccupantId, to: Location) -> Relocation {
        let mut state = self.state.lock();
        state.relocations += 1;
        if state.hold_relocations {
            let settled = Arc::new(AtomicBool::new(false));
            state.held.push((occupant.clone(), to, Arc::clone(&settled)));
            return futures::future::poll_fn(move |_| {
                if settled.load(Ordering::Acquire) {
                    Poll::Ready(Ok(()))
                } else {
                    Poll::Pending
                }
            })
            .boxed();
        }
        let _ = state.locations.insert(occupant.clone(), to);
        futures::future::ready(Ok(())).boxed()
    }

    fn home(&self) -> Location {
        Self::home_location()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Behavior
// ─────────────────────────────────────────────────────────────────────────────

/// Ordered record of behavior hook calls, e.g. `"init arena1"`.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: String) {
        self.0.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.count(entry) > 0
    }
}

/// Knobs for [`Scripted`].
#[derive(Clone, Debug)]
pub struct Script {
    pub template: String,
    pub refuse_joins: bool,
    pub fail_init: bool,
    pub fail_close: bool,
    pub stop_on_tick: Option<usize>,
    pub spawn: Option<(f64, f64, f64)>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            template: "duel".to_string(),
            refuse_joins: false,
            fail_init: false,
            fail_close: false,
            stop_on_tick: None,
            spawn: None,
        }
    }
}

/// Behavior that journals every hook and follows a [`Script`].
pub struct Scripted {
    script: Script,
    journal: Journal,
    ticks: usize,
}

impl SessionBehavior for Scripted {
    fn source_template(&self) -> &str {
        &self.script.template
    }

    fn init(&mut self, ctx: &SessionContext) -> Result<(), BehaviorError> {
        self.journal.push(format!("init {}", ctx.name()));
        if self.script.fail_init {
            return Err(BehaviorError::new("scoreboard missing"));
        }
        Ok(())
    }

    fn tick(&mut self, ctx: &SessionContext) {
        self.ticks += 1;
        self.journal.push(format!("tick {}", ctx.name()));
        if self.script.stop_on_tick == Some(self.ticks) {
            let accepted = ctx.request_stop();
            self.journal.push(format!("request_stop {} {accepted}", ctx.name()));
        }
    }

    fn close(&mut self, ctx: &SessionContext) -> Result<(), BehaviorError> {
        self.journal.push(format!("close {}", ctx.name()));
        if self.script.fail_close {
            return Err(BehaviorError::new("could not save results"));
        }
        Ok(())
    }

    fn admit(&self, _ctx: &SessionContext, _occupant: &OccupantId) -> bool {
        !self.script.refuse_joins
    }

    fn position_joining(
        &self,
        _ctx: &SessionContext,
        _occupant: &OccupantId,
        current: &Location,
    ) -> Location {
        match self.script.spawn {
            Some((x, y, z)) => Location::new(current.environment.clone(), x, y, z),
            None => current.clone(),
        }
    }

    fn add_occupant(&mut self, ctx: &SessionContext, occupant: &OccupantId) {
        self.journal.push(format!("add {} {occupant}", ctx.name()));
    }

    fn remove_occupant(&mut self, ctx: &SessionContext, occupant: &OccupantId) {
        self.journal.push(format!("remove {} {occupant}", ctx.name()));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Harness
// ─────────────────────────────────────────────────────────────────────────────

pub fn key(s: &str) -> TemplateKey {
    s.parse().unwrap()
}

pub fn name(s: &str) -> SessionName {
    SessionName::from(s)
}

pub fn occupant(s: &str) -> OccupantId {
    OccupantId::from(s)
}

/// Write a directory template `<root>/<name>/` with two files.
pub fn write_dir_template(root: &Path, template: &str) {
    std::fs::create_dir_all(root.join(template).join("region")).unwrap();
    std::fs::write(root.join(template).join("level.dat"), template.as_bytes()).unwrap();
    std::fs::write(root.join(template).join("region/r.0.0.mca"), b"chunks").unwrap();
}

/// Config over `root/templates` (holding a `duel` directory template) and
/// `root/instances`.
pub fn scratch_config(root: &Path, max_threads: usize) -> OrchestratorConfig {
    let template_root = root.join("templates");
    write_dir_template(&template_root, "duel");
    OrchestratorConfig {
        template_root,
        instance_root: root.join("instances"),
        environment_prefix: "instance-".to_string(),
        workers: PoolConfig {
            max_threads,
            thread_name_prefix: "test-worker".to_string(),
        },
        shutdown_grace: Duration::from_secs(5),
    }
}

/// Register a [`Scripted`] following `script` under `template_key`.
pub fn register_scripted(
    registry: &BehaviorRegistry,
    template_key: &str,
    journal: &Journal,
    script: Script,
) {
    let journal = journal.clone();
    let _ = registry.register(key(template_key), move || Scripted {
        script: script.clone(),
        journal: journal.clone(),
        ticks: 0,
    });
}

/// An orchestrator over a scratch data directory with a `duel` directory
/// template registered as `arcade:duel`.
pub struct Harness {
    pub tmp: tempfile::TempDir,
    pub host: Arc<FakeHost>,
    pub registry: Arc<BehaviorRegistry>,
    pub journal: Journal,
    pub orchestrator: Orchestrator,
}

impl Harness {
    /// Background jobs run inline.
    pub fn new() -> Self {
        Self::with_workers(0)
    }

    pub fn with_workers(max_threads: usize) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let config = scratch_config(tmp.path(), max_threads);
        let host = Arc::new(FakeHost::default());
        let registry = Arc::new(BehaviorRegistry::new());
        let journal = Journal::default();

        let orchestrator = Orchestrator::new(
            config,
            Arc::clone(&registry) as Arc<dyn Registry>,
            Arc::clone(&host) as Arc<dyn Host>,
        )
        .unwrap();

        let harness = Self {
            tmp,
            host,
            registry,
            journal,
            orchestrator,
        };
        harness.register("duel", Script::default());
        harness
    }

    pub fn register(&self, template_key: &str, script: Script) {
        register_scripted(&self.registry, template_key, &self.journal, script);
    }

    pub fn template_root(&self) -> &Path {
        &self.orchestrator.config().template_root
    }

    pub fn instance_dir(&self, id: u32) -> std::path::PathBuf {
        self.orchestrator
            .config()
            .instance_root
            .join(format!("instance-{id}"))
    }

    /// Tick until `pending` resolves.
    pub fn drive<T>(&self, pending: &mut Pending<T>) -> Result<T, OrchestratorError> {
        for _ in 0..1_000 {
            let _ = self.orchestrator.tick().unwrap();
            if let Some(result) = pending.try_take() {
                return result;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("operation did not resolve");
    }

    pub fn start_running(&self, session: &str) -> Arc<InstanceRecord> {
        let mut pending = self.orchestrator.start(name(session), key("duel"));
        self.drive(&mut pending).unwrap()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Zip fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// How a zip entry is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Store,
    Deflate,
    /// Bzip2 method id with stored bytes; readers must refuse it.
    Bzip2,
}

impl Method {
    fn id(self) -> u16 {
        match self {
            Self::Store => 0,
            Self::Deflate => 8,
            Self::Bzip2 => 12,
        }
    }
}

/// Build a zip archive in memory. Names ending in `/` are directories.
pub fn zip_bytes(entries: &[(&str, &[u8], Method)]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();
    let dos_date: u16 = (1 << 5) | 1;

    for (entry_name, data, method) in entries {
        let mut crc = flate2::Crc::new();
        crc.update(data);
        let crc = crc.sum();
        let stored = match method {
            Method::Deflate => {
                let mut encoder =
                    flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data).unwrap();
                encoder.finish().unwrap()
            }
            Method::Store | Method::Bzip2 => data.to_vec(),
        };
        let offset = u32::try_from(out.len()).unwrap();
        let name_len = u16::try_from(entry_name.len()).unwrap();
        let stored_len = u32::try_from(stored.len()).unwrap();
        let data_len = u32::try_from(data.len()).unwrap();

        out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
        out.extend_from_slice(&20u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&method.id().to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&dos_date.to_le_bytes());
        out.extend_from_slice(&crc.to_le_bytes());
        out.extend_from_slice(&stored_len.to_le_bytes());
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend_from_slice(&name_len.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(entry_name.as_bytes());
        out.extend_from_slice(&stored);

        let external: u32 = if entry_name.ends_with('/') { 0x10 } else { 0 };
        central.extend_from_slice(&0x0201_4b50u32.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&20u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&method.id().to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&dos_date.to_le_bytes());
        central.extend_from_slice(&crc.to_le_bytes());
        central.extend_from_slice(&stored_len.to_le_bytes());
        central.extend_from_slice(&data_len.to_le_bytes());
        central.extend_from_slice(&name_len.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&0u16.to_le_bytes());
        central.extend_from_slice(&external.to_le_bytes());
        central.extend_from_slice(&offset.to_le_bytes());
        central.extend_from_slice(entry_name.as_bytes());
    }

    let central_offset = u32::try_from(out.len()).unwrap();
    let central_len = u32::try_from(central.len()).unwrap();
    let count = u16::try_from(entries.len()).unwrap();
    out.extend_from_slice(&central);
    out.extend_from_slice(&0x0605_4b50u32.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&central_len.to_le_bytes());
    out.extend_from_slice(&central_offset.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out
}

/// Write `<root>/<template>.zip`.
pub fn write_zip_template(root: &Path, template: &str, entries: &[(&str, &[u8], Method)]) {
    std::fs::create_dir_all(root).unwrap();
    std::fs::write(root.join(format!("{template}.zip")), zip_bytes(entries)).unwrap();
}
