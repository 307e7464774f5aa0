//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        /// File that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The settings file is not valid JSON.
    #[error("failed to parse settings file {}: {source}", path.display())]
    Parse {
        /// File that was being parsed.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// The merged document does not match the settings schema.
    #[error("settings do not match the schema: {0}")]
    Schema(#[from] serde_json::Error),
    /// A value is out of range or inconsistent with another one.
    #[error("invalid setting {field}: {reason}")]
    Invalid {
        /// camelCase path of the offending setting, e.g. `instances.dir`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
