//! Thread-local tracing capture for assertions in tests.
//!
//! Orchestrator events carry `session`, `id` and `error` fields; the
//! helpers here look events up by level, message fragment and session.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::field::{Field, Visit};
use tracing::level_filters::LevelFilter;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// One recorded event.
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    /// Event level.
    pub level: Level,
    /// Emitting module path.
    pub target: String,
    /// The `message` field.
    pub message: String,
    /// Every other field, rendered with `Display` when recorded as a string
    /// and `Debug` otherwise.
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    /// A recorded field, if present.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// The `session` field.
    pub fn session(&self) -> Option<&str> {
        self.field("session")
    }

    fn matches(&self, level: Option<Level>, fragment: &str) -> bool {
        level.is_none_or(|l| self.level == l) && self.message.contains(fragment)
    }
}

/// Shared buffer behind a capture layer.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedLogs {
    fn buffer(&self) -> MutexGuard<'_, Vec<CapturedEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of everything recorded so far.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.buffer().clone()
    }

    /// First event at any level whose message contains `fragment`.
    pub fn find(&self, fragment: &str) -> Option<CapturedEvent> {
        self.buffer()
            .iter()
            .find(|e| e.matches(None, fragment))
            .cloned()
    }

    /// Whether any event's message contains `fragment`.
    pub fn has_message(&self, fragment: &str) -> bool {
        self.buffer().iter().any(|e| e.matches(None, fragment))
    }

    /// Whether an event at `level` has a message containing `fragment`.
    pub fn has_event(&self, level: Level, fragment: &str) -> bool {
        self.buffer().iter().any(|e| e.matches(Some(level), fragment))
    }

    /// Events tagged with `session = <name>`, in emission order.
    pub fn for_session(&self, name: &str) -> Vec<CapturedEvent> {
        self.buffer()
            .iter()
            .filter(|e| e.session() == Some(name))
            .cloned()
            .collect()
    }

    /// Number of events at `level`.
    pub fn count_at_level(&self, level: Level) -> usize {
        self.buffer().iter().filter(|e| e.level == level).count()
    }

    /// Drop everything recorded so far.
    pub fn clear(&self) {
        self.buffer().clear();
    }
}

#[derive(Default)]
struct Recorder {
    message: String,
    fields: BTreeMap<String, String>,
}

impl Recorder {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            let _ = self.fields.insert(field.name().to_owned(), value);
        }
    }
}

impl Visit for Recorder {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}

struct CaptureLayer(CapturedLogs);

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut recorder = Recorder::default();
        event.record(&mut recorder);
        let metadata = event.metadata();
        self.0.buffer().push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_owned(),
            message: recorder.message,
            fields: recorder.fields,
        });
    }
}

/// Capture every event emitted on the current thread while the guard lives.
///
/// Jobs running on worker pool threads are not captured; tests that assert
/// on background work use a direct-mode pool.
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let guard = tracing_subscriber::registry()
        .with(CaptureLayer(logs.clone()))
        .with(LevelFilter::TRACE)
        .set_default();
    (logs, guard)
}
