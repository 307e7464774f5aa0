//! Structured logging with `tracing`.
//!
//! Orchestrator context (session name, instance id, run id) travels on
//! tracing spans and event fields rather than being formatted into messages.
//!
//! - [`init_subscriber`] installs the process-wide stderr subscriber
//! - [`capture_logs`] installs a thread-local capture layer for tests

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Initialize the global tracing subscriber with stderr output only.
///
/// Call once at host startup. Subsequent calls are no-ops. `RUST_LOG`, when
/// set, takes precedence over `level`.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .compact();

    // A host that installed its own subscriber keeps it.
    let _ = subscriber.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_ignored() {
        init_subscriber("warn");
        init_subscriber("arcade_runtime=debug");
        tracing::info!(session = "arena1", "still logging");
    }
}
