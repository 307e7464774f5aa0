//! Template store and instance directory settings.
//!
//! Directory values are relative to the host's data directory unless
//! absolute.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Where templates are read from.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateSettings {
    /// Template store root; holds `<name>/` directories and `<name>.zip` archives.
    pub dir: String,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            dir: "templates".to_string(),
        }
    }
}

impl TemplateSettings {
    /// Resolve the store root against a data directory.
    pub fn resolve(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.dir)
    }
}

/// Where instances are materialized and how their environments are named.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstanceSettings {
    /// Parent directory of every instance mount point.
    pub dir: String,
    /// Prefix of environment keys and mount directories (`<prefix><id>`).
    pub environment_prefix: String,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            dir: "instances".to_string(),
            environment_prefix: "instance-".to_string(),
        }
    }
}

impl InstanceSettings {
    /// Resolve the instance root against a data directory.
    pub fn resolve(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.dir)
    }
}
