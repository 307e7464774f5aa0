use std::thread::ThreadId;

use crate::errors::OrchestratorError;

/// The thread that owns environment mutation and behavior callbacks.
#[derive(Clone, Copy, Debug)]
pub(super) struct Affinity {
    thread: ThreadId,
}

impl Affinity {
    /// Bind to the calling thread.
    pub(super) fn current() -> Self {
        Self {
            thread: std::thread::current().id(),
        }
    }

    pub(super) fn is_current(self) -> bool {
        std::thread::current().id() == self.thread
    }

    pub(super) fn check(self, operation: &'static str) -> Result<(), OrchestratorError> {
        if self.is_current() {
            Ok(())
        } else {
            Err(OrchestratorError::OffAffinityThread { operation })
        }
    }
}
