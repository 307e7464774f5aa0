//! Smallest-free instance id allocation.

use std::collections::BTreeSet;

use arcade_core::InstanceId;

/// Hands out the smallest [`InstanceId`] not held by a live instance.
///
/// Not synchronized; the orchestrator only touches it under its state lock.
#[derive(Debug, Default)]
pub struct IdAllocator {
    used: BTreeSet<u32>,
}

impl IdAllocator {
    /// Empty allocator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve and return the smallest free id.
    pub fn allocate(&mut self) -> InstanceId {
        let mut candidate = 0u32;
        for &id in &self.used {
            if id != candidate {
                break;
            }
            candidate += 1;
        }
        let _ = self.used.insert(candidate);
        InstanceId::new(candidate)
    }

    /// Return an id to the free set. Returns `false` if it was not in use.
    pub fn release(&mut self, id: InstanceId) -> bool {
        self.used.remove(&id.get())
    }

    /// Whether `id` is currently reserved.
    pub fn is_used(&self, id: InstanceId) -> bool {
        self.used.contains(&id.get())
    }

    /// Number of reserved ids.
    pub fn len(&self) -> usize {
        self.used.len()
    }

    /// Whether no id is reserved.
    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }

    /// Reserved ids in ascending order.
    pub fn used(&self) -> Vec<InstanceId> {
        self.used.iter().copied().map(InstanceId::new).collect()
    }

    /// Forget every reservation.
    pub fn reset(&mut self) {
        self.used.clear();
    }
}
