//! The set of ticking entities.

use crate::borrow::AtomicRefCell;
use crate::entity::EntityId;
use crate::error::{Error, Result};
use crate::util::{AtomicUsize, HashSet};
use core::cell::Cell;
use core::marker::PhantomData;
use core::sync::atomic::Ordering;

const NOT_ITERATING: usize = usize::MAX;

/// Registry of ticking entities which may be mutated while
/// it is being traversed.
///
/// Two buffers are kept. `for_each` traverses the active buffer;
/// the first mutation during a traversal copies it into the passive
/// buffer and makes that one active, so the traversed buffer never
/// changes under the iterator while every other caller sees the
/// mutation immediately.
///
/// Only one traversal may run at a time. The set is `Send` but not
/// `Sync`: traversals and mutations happen on one thread.
///
/// ```compile_fail
/// fn assert_sync<T: Sync>() {}
/// assert_sync::<entity_sections::ActiveSet>();
/// ```
#[derive(Debug)]
pub struct ActiveSet {
    buffers: [AtomicRefCell<HashSet<EntityId>>; 2],
    /// Index of the active buffer.
    active: AtomicUsize,
    /// Index of the buffer being traversed, or `NOT_ITERATING`.
    iterated: AtomicUsize,
    _not_sync: PhantomData<Cell<()>>,
}

impl Default for ActiveSet {
    fn default() -> Self {
        Self {
            buffers: [AtomicRefCell::default(), AtomicRefCell::default()],
            active: AtomicUsize::new(0),
            iterated: AtomicUsize::new(NOT_ITERATING),
            _not_sync: PhantomData,
        }
    }
}

impl ActiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index of the buffer mutations must go to.
    fn ensure_active_is_not_iterated(&self) -> usize {
        let active = self.active.load(Ordering::Acquire);
        if self.iterated.load(Ordering::Acquire) != active {
            return active;
        }

        let passive = 1 - active;
        {
            let source = self.buffers[active].borrow();
            let mut target = self.buffers[passive].borrow_mut();
            target.clear();
            target.extend(source.iter().copied());
        }
        self.active.store(passive, Ordering::Release);
        passive
    }

    /// Adds an entity, returning `false` if it was already present.
    pub fn add(&self, entity: EntityId) -> bool {
        let active = self.ensure_active_is_not_iterated();
        self.buffers[active].borrow_mut().insert(entity)
    }

    /// Removes an entity, returning `false` if it was not present.
    pub fn remove(&self, entity: EntityId) -> bool {
        let active = self.ensure_active_is_not_iterated();
        self.buffers[active].borrow_mut().remove(&entity)
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.active_buffer().borrow().contains(&entity)
    }

    pub fn len(&self) -> usize {
        self.active_buffer().borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the current members out.
    pub fn ids(&self) -> Vec<EntityId> {
        self.active_buffer().borrow().iter().copied().collect()
    }

    /// Calls `f` for every entity that was ticking when the traversal
    /// started. Entities removed by `f` may still be visited afterwards
    /// and entities added by `f` are not.
    ///
    /// Returns `Error::ReentrantIteration` if another traversal is running.
    pub fn for_each(&self, mut f: impl FnMut(EntityId)) -> Result<()> {
        let active = self.active.load(Ordering::Acquire);
        if self
            .iterated
            .compare_exchange(NOT_ITERATING, active, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::ReentrantIteration);
        }
        let _guard = IterationGuard(&self.iterated);

        let snapshot = self.buffers[active].try_borrow()?;
        for &entity in snapshot.iter() {
            f(entity);
        }
        Ok(())
    }

    fn active_buffer(&self) -> &AtomicRefCell<HashSet<EntityId>> {
        &self.buffers[self.active.load(Ordering::Acquire)]
    }
}

/// Ends the traversal even if the visitor panics.
struct IterationGuard<'a>(&'a AtomicUsize);

impl<'a> Drop for IterationGuard<'a> {
    fn drop(&mut self) {
        self.0.store(NOT_ITERATING, Ordering::Release);
    }
}
