//! Orchestrator error types.

use arcade_core::{OccupantId, SessionName, TemplateKey};

use crate::behavior::BehaviorError;
use crate::host::HostError;
use crate::pool::PoolError;
use crate::template::TemplateLoadError;

/// Errors surfaced by [`Orchestrator`](crate::Orchestrator) operations.
///
/// Every failed operation leaves the live map and the id allocator exactly
/// as they were before the call.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The name already has a creating, running or closing instance.
    #[error("Session already exists: {0}")]
    DuplicateSession(SessionName),

    /// No behavior factory is registered under the key.
    #[error("Unknown template: {0}")]
    UnknownTemplate(TemplateKey),

    /// Template materialization failed.
    #[error(transparent)]
    TemplateLoad(#[from] TemplateLoadError),

    /// The host refused to mount the materialized environment.
    #[error("Failed to mount environment for {name}: {source}")]
    EnvironmentMount {
        /// Session being started.
        name: SessionName,
        /// Host failure.
        #[source]
        source: HostError,
    },

    /// The name is absent, still creating, or already being evacuated.
    #[error("Unknown session: {0}")]
    UnknownSession(SessionName),

    /// The behavior's `init` hook failed; the instance was torn down.
    #[error("Session {name} failed to initialize: {source}")]
    SessionInit {
        /// Session being started.
        name: SessionName,
        /// Behavior failure.
        #[source]
        source: BehaviorError,
    },

    /// `close` or unmount failed during teardown. The name and id were
    /// still released.
    #[error("Session {name} did not close cleanly: {message}")]
    CloseFailed {
        /// Session being stopped.
        name: SessionName,
        /// Failure description.
        message: String,
    },

    /// The host has no location for the occupant.
    #[error("Unknown occupant: {0}")]
    UnknownOccupant(OccupantId),

    /// A background job panicked or was dropped.
    #[error(transparent)]
    Worker(#[from] PoolError),

    /// An affinity-only operation was called from another thread.
    #[error("{operation} must run on the affinity thread")]
    OffAffinityThread {
        /// Operation name.
        operation: &'static str,
    },

    /// The orchestrator is shutting down.
    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    /// The operation's result was dropped without being resolved.
    #[error("Operation abandoned before completion")]
    Abandoned,
}

impl OrchestratorError {
    /// Error category string for logs and metrics labels.
    pub fn category(&self) -> &'static str {
        match self {
            Self::DuplicateSession(_) => "duplicate_session",
            Self::UnknownTemplate(_) => "unknown_template",
            Self::TemplateLoad(_) => "template_load",
            Self::EnvironmentMount { .. } => "environment_mount",
            Self::UnknownSession(_) => "unknown_session",
            Self::SessionInit { .. } => "session_init",
            Self::CloseFailed { .. } => "close_failed",
            Self::UnknownOccupant(_) => "unknown_occupant",
            Self::Worker(_) => "worker",
            Self::OffAffinityThread { .. } => "off_affinity_thread",
            Self::ShuttingDown => "shutting_down",
            Self::Abandoned => "abandoned",
        }
    }

    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::DuplicateSession(_) | Self::Worker(_) | Self::EnvironmentMount { .. } => true,
            Self::UnknownTemplate(_)
            | Self::TemplateLoad(_)
            | Self::UnknownSession(_)
            | Self::SessionInit { .. }
            | Self::CloseFailed { .. }
            | Self::UnknownOccupant(_)
            | Self::OffAffinityThread { .. }
            | Self::ShuttingDown
            | Self::Abandoned => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateLoadCause;

    #[test]
    fn display_duplicate_session() {
        let err = OrchestratorError::DuplicateSession(SessionName::from("arena1"));
        assert_eq!(err.to_string(), "Session already exists: arena1");
    }

    #[test]
    fn template_load_is_transparent() {
        let err: OrchestratorError =
            TemplateLoadError::new("duel", TemplateLoadCause::NotFound).into();
        assert!(err.to_string().contains("duel"));
        assert_eq!(err.category(), "template_load");
    }

    #[test]
    fn mount_error_keeps_source() {
        let err = OrchestratorError::EnvironmentMount {
            name: SessionName::from("arena1"),
            source: HostError::new("disk full"),
        };
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("disk full"));
    }

    #[test]
    fn transient_classification() {
        assert!(OrchestratorError::DuplicateSession(SessionName::from("a")).is_transient());
        assert!(!OrchestratorError::ShuttingDown.is_transient());
        assert!(!OrchestratorError::UnknownSession(SessionName::from("a")).is_transient());
    }

    #[test]
    fn categories_are_distinct() {
        let errors = [
            OrchestratorError::UnknownSession(SessionName::from("a")),
            OrchestratorError::UnknownOccupant(OccupantId::from("o")),
            OrchestratorError::OffAffinityThread { operation: "tick" },
            OrchestratorError::ShuttingDown,
            OrchestratorError::Abandoned,
        ];
        let categories: std::collections::HashSet<_> =
            errors.iter().map(OrchestratorError::category).collect();
        assert_eq!(categories.len(), errors.len());
    }
}
