//! Worker pool, shutdown and logging settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Background worker pool sizing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerSettings {
    /// Upper bound on worker threads. The pool uses
    /// `min(available_parallelism - 1, max_threads)`; zero runs every job
    /// inline on the submitting thread.
    pub max_threads: usize,
    /// Worker threads are named `<prefix>-<n>`.
    pub thread_name_prefix: String,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            max_threads: 7,
            thread_name_prefix: "arcade-worker".to_string(),
        }
    }
}

/// Shutdown behaviour.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShutdownSettings {
    /// How long shutdown waits for background jobs (template copies,
    /// directory deletions) before abandoning them.
    pub grace_period_ms: u64,
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: 10_000,
        }
    }
}

impl ShutdownSettings {
    /// Grace period as a [`Duration`].
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_period_duration() {
        let settings = ShutdownSettings {
            grace_period_ms: 2_500,
        };
        assert_eq!(settings.grace_period(), Duration::from_millis(2_500));
    }
}
