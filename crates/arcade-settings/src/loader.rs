//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`ArcadeSettings::default()`]
//! 2. If `~/.arcade/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::ArcadeSettings;

/// Resolve the path to the settings file (`~/.arcade/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".arcade").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<ArcadeSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON or the merged settings fail validation, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<ArcadeSettings> {
    load_with_overrides(path, |name| std::env::var(name).ok())
}

fn load_with_overrides(
    path: &Path,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<ArcadeSettings> {
    let defaults = serde_json::to_value(ArcadeSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: ArcadeSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `ARCADE_*` overrides read through `lookup`.
///
/// Invalid values are ignored with a warning (fall back to file/default).
fn apply_overrides(settings: &mut ArcadeSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Paths ───────────────────────────────────────────────────────
    if let Some(v) = string("ARCADE_TEMPLATES_DIR") {
        settings.templates.dir = v;
    }
    if let Some(v) = string("ARCADE_INSTANCES_DIR") {
        settings.instances.dir = v;
    }
    if let Some(v) = string("ARCADE_ENVIRONMENT_PREFIX") {
        settings.instances.environment_prefix = v;
    }

    // ── Workers / shutdown ──────────────────────────────────────────
    if let Some(v) = string("ARCADE_WORKER_THREADS") {
        match parse_usize_range(&v, 0, 256) {
            Some(n) => settings.workers.max_threads = n,
            None => warn_invalid("ARCADE_WORKER_THREADS", &v),
        }
    }
    if let Some(v) = string("ARCADE_SHUTDOWN_GRACE_MS") {
        match parse_u64_range(&v, 0, 600_000) {
            Some(n) => settings.shutdown.grace_period_ms = n,
            None => warn_invalid("ARCADE_SHUTDOWN_GRACE_MS", &v),
        }
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = string("ARCADE_LOG_LEVEL") {
        settings.logging.level = v;
    }
}

fn warn_invalid(key: &str, value: &str) {
    tracing::warn!(key, value, "invalid env var, ignoring");
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
