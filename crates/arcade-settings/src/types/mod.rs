//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields take their compiled default.

mod paths;
mod runtime;

pub use paths::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// # JSON Format
///
/// ```json
/// {
///   "templates": { "dir": "minigames" },
///   "workers": { "maxThreads": 3 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArcadeSettings {
    /// Settings schema version.
    pub version: String,
    /// Template store location.
    pub templates: TemplateSettings,
    /// Instance directories and environment naming.
    pub instances: InstanceSettings,
    /// Background worker pool sizing.
    pub workers: WorkerSettings,
    /// Shutdown behaviour.
    pub shutdown: ShutdownSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ArcadeSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            templates: TemplateSettings::default(),
            instances: InstanceSettings::default(),
            workers: WorkerSettings::default(),
            shutdown: ShutdownSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ArcadeSettings {
    /// Reject values the orchestrator cannot work with.
    pub fn validate(&self) -> Result<()> {
        let prefix = &self.instances.environment_prefix;
        if prefix.is_empty() {
            return Err(SettingsError::invalid("instances.environmentPrefix", "is empty"));
        }
        if prefix.contains(['/', '\\']) || prefix.contains("..") {
            return Err(SettingsError::invalid(
                "instances.environmentPrefix",
                format!("{prefix:?} must not contain path separators"),
            ));
        }
        if self.templates.dir.is_empty() {
            return Err(SettingsError::invalid("templates.dir", "is empty"));
        }
        if self.instances.dir.is_empty() {
            return Err(SettingsError::invalid("instances.dir", "is empty"));
        }
        if self.templates.dir == self.instances.dir {
            return Err(SettingsError::invalid(
                "instances.dir",
                "must differ from templates.dir",
            ));
        }
        if self.workers.thread_name_prefix.is_empty() {
            return Err(SettingsError::invalid("workers.threadNamePrefix", "is empty"));
        }
        Ok(())
    }
}
