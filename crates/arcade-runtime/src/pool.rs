//! Bounded background pool for disk-bound work.
//!
//! Template copies, archive extraction and directory deletion run here so
//! they never block the affinity thread. Jobs are plain closures; their
//! results come back through a [`Job`] handle that the tick loop polls
//! without blocking.
//!
//! With no spare parallelism (or `max_threads = 0`) the pool degrades to
//! direct execution: every job runs inline on the submitting thread and the
//! returned handle is already resolved.

use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use arcade_settings::WorkerSettings;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Errors from background jobs.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The job panicked. The worker thread survives.
    #[error("Background job {label} panicked: {message}")]
    Panicked {
        /// Job label.
        label: String,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// The job was dropped before producing a result (pool shut down
    /// mid-queue).
    #[error("Background job {label} was dropped")]
    Dropped {
        /// Job label.
        label: String,
    },

    /// The pool could not be built.
    #[error("Failed to build worker pool: {0}")]
    Build(#[from] std::io::Error),
}

/// Pool sizing and naming.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Cap on worker threads.
    pub max_threads: usize,
    /// Threads are named `<prefix>-<n>`, `n` starting at 1.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::from_settings(&WorkerSettings::default())
    }
}

impl PoolConfig {
    /// Build from the `workers` settings section.
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            max_threads: settings.max_threads,
            thread_name_prefix: settings.thread_name_prefix.clone(),
        }
    }

    /// Pool config that runs every job inline.
    pub fn direct() -> Self {
        Self {
            max_threads: 0,
            ..Self::default()
        }
    }

    /// `min(available_parallelism - 1, max_threads)`.
    pub fn effective_threads(&self) -> usize {
        let cpus = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        cpus.saturating_sub(1).min(self.max_threads)
    }
}

enum Mode {
    Direct,
    Threaded(tokio::runtime::Runtime),
    Stopped,
}

/// Background worker pool.
pub struct WorkerPool {
    mode: Mutex<Mode>,
    threads: usize,
    in_flight: Arc<AtomicUsize>,
    name_counter: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Build the pool. Threads are spawned lazily as jobs arrive.
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        let threads = config.effective_threads();
        let name_counter = Arc::new(AtomicUsize::new(1));

        let mode = if threads == 0 {
            info!("no spare parallelism, background jobs run inline");
            Mode::Direct
        } else {
            let prefix = config.thread_name_prefix.clone();
            let counter = Arc::clone(&name_counter);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .max_blocking_threads(threads)
                .thread_name_fn(move || {
                    let n = counter.fetch_add(1, Ordering::Relaxed);
                    format!("{prefix}-{n}")
                })
                .build()?;
            info!(threads, prefix = %config.thread_name_prefix, "worker pool started");
            Mode::Threaded(runtime)
        };

        Ok(Self {
            mode: Mutex::new(mode),
            threads,
            in_flight: Arc::new(AtomicUsize::new(0)),
            name_counter,
        })
    }

    /// Maximum worker threads; zero in direct mode.
    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Whether jobs run inline on the submitting thread.
    pub fn is_direct(&self) -> bool {
        matches!(*self.mode.lock(), Mode::Direct)
    }

    /// Jobs submitted and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Next worker thread number.
    pub fn next_thread_number(&self) -> usize {
        self.name_counter.load(Ordering::Relaxed)
    }

    /// Run `work` in the background.
    ///
    /// After [`shutdown`](Self::shutdown) jobs run inline so teardown
    /// deletions still happen.
    pub fn submit<T, F>(&self, label: impl Into<String>, work: F) -> Job<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = oneshot::channel();
        let handle = match &*self.mode.lock() {
            Mode::Threaded(runtime) => Some(runtime.handle().clone()),
            Mode::Direct | Mode::Stopped => None,
        };
        if let Some(handle) = handle {
            let ticket = InFlight::enter(&self.in_flight);
            let job_label = label.clone();
            debug!(label = %label, "job queued");
            drop(handle.spawn_blocking(move || {
                let result = run_guarded(&job_label, work);
                let _ = tx.send(result);
                drop(ticket);
            }));
        } else {
            let _ = tx.send(run_guarded(&label, work));
        }
        Job { label, rx }
    }

    /// Wait up to `grace` for in-flight jobs, then stop the threads and
    /// reset the thread naming counter. Returns `true` if every job
    /// finished in time.
    ///
    /// Must not be called from inside an async context.
    pub fn shutdown(&self, grace: Duration) -> bool {
        let mode = std::mem::replace(&mut *self.mode.lock(), Mode::Stopped);
        let drained = match mode {
            Mode::Threaded(runtime) => {
                let deadline = Instant::now() + grace;
                while self.in_flight() > 0 && Instant::now() < deadline {
                    std::thread::sleep(Duration::from_millis(2));
                }
                let drained = self.in_flight() == 0;
                if !drained {
                    warn!(
                        in_flight = self.in_flight(),
                        grace_ms = grace.as_millis(),
                        "background jobs still running after grace period"
                    );
                }
                runtime.shutdown_timeout(deadline.saturating_duration_since(Instant::now()));
                drained
            }
            Mode::Direct | Mode::Stopped => true,
        };
        self.name_counter.store(1, Ordering::Relaxed);
        info!(drained, "worker pool stopped");
        drained
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

/// Counts a queued job until it finishes or is dropped unrun.
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        let _ = counter.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn run_guarded<T>(label: &str, work: impl FnOnce() -> T) -> Result<T, PoolError> {
    catch_unwind(AssertUnwindSafe(work)).map_err(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        error!(
            label,
            thread = std::thread::current().name().unwrap_or("<unnamed>"),
            message = %message,
            "background job panicked"
        );
        PoolError::Panicked {
            label: label.to_string(),
            message,
        }
    })
}

/// Handle to a background job's result.
///
/// Poll without blocking via [`try_take`](Self::try_take), or `.await` it.
#[must_use = "a job's failure is only visible through its handle"]
pub struct Job<T> {
    label: String,
    rx: oneshot::Receiver<Result<T, PoolError>>,
}

impl<T> Job<T> {
    /// Job label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Take the result if the job has finished.
    pub fn try_take(&mut self) -> Option<Result<T, PoolError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PoolError::Dropped {
                label: self.label.clone(),
            })),
        }
    }

    /// Block the current thread until the job finishes.
    ///
    /// Must not be called from inside an async context.
    pub fn wait(self) -> Result<T, PoolError> {
        let Self { label, rx } = self;
        rx.blocking_recv()
            .unwrap_or(Err(PoolError::Dropped { label }))
    }
}

impl<T> Future for Job<T> {
    type Output = Result<T, PoolError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        Pin::new(&mut this.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Err(PoolError::Dropped {
                    label: this.label.clone(),
                })
            })
        })
    }
}

impl<T> fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("label", &self.label).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
