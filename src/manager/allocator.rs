use crate::entity::EntityId;
use std::collections::VecDeque;

/// Hands out entity ids. Freed ids are reused oldest first.
#[derive(Debug, Default)]
pub struct IdAllocator {
    free: VecDeque<u64>,
    /// The next never-used id. Used if `free` is empty.
    next: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self) -> EntityId {
        EntityId(self.free.pop_front().unwrap_or_else(|| {
            self.next += 1;
            self.next - 1
        }))
    }

    /// Returns an id to the pool. The entity it named must be gone.
    pub fn free(&mut self, id: EntityId) {
        self.free.push_back(id.0);
    }

    /// Number of ids currently handed out.
    pub fn allocated(&self) -> usize {
        self.next as usize - self.free.len()
    }
}
