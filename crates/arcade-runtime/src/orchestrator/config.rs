//! Orchestrator configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use arcade_core::InstanceId;
use arcade_settings::ArcadeSettings;

use crate::host::EnvironmentHandle;
use crate::pool::PoolConfig;

/// Resolved orchestrator configuration.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Template store root.
    pub template_root: PathBuf,
    /// Parent of every instance directory.
    pub instance_root: PathBuf,
    /// Environment keys and instance directories are `<prefix><id>`.
    pub environment_prefix: String,
    /// Background pool sizing.
    pub workers: PoolConfig,
    /// How long shutdown waits for background jobs.
    pub shutdown_grace: Duration,
}

impl OrchestratorConfig {
    /// Resolve settings against the host's data directory.
    pub fn from_settings(settings: &ArcadeSettings, data_dir: &Path) -> Self {
        Self {
            template_root: settings.templates.resolve(data_dir),
            instance_root: settings.instances.resolve(data_dir),
            environment_prefix: settings.instances.environment_prefix.clone(),
            workers: PoolConfig::from_settings(&settings.workers),
            shutdown_grace: settings.shutdown.grace_period(),
        }
    }

    /// Environment handle for slot `id`.
    pub fn environment_for(&self, id: InstanceId) -> EnvironmentHandle {
        let key = id.environment_key(&self.environment_prefix);
        let path = self.instance_root.join(key.as_str());
        EnvironmentHandle { key, id, path }
    }

    /// Whether `key` names an instance environment, live or stale.
    pub fn is_instance_environment(&self, key: &str) -> bool {
        key.strip_prefix(self.environment_prefix.as_str())
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    }
}
