//! A non-blocking, atomically flagged `RefCell`.
//!
//! The buffers of the `ActiveSet` live in these cells so that
//! the set can be shared with the host while it is being iterated.

use crate::util::AtomicU32;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::Ordering;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorrowError {
    #[error("value already mutably borrowed")]
    MutablyBorrowed,
    #[error("value already immutably borrowed")]
    ImmutablyBorrowed,
}

/// Like `RefCell`, but atomic. Akin to a `RwLock`
/// which never blocks.
#[derive(Debug)]
pub struct AtomicRefCell<T> {
    value: UnsafeCell<T>,
    /// Set to `MUTABLE` while mutably borrowed. Otherwise
    /// the number of live immutable borrows.
    flag: AtomicU32,
}

const NO_BORROWS: u32 = 0;
const MUTABLE: u32 = u32::MAX;

// Safety: access to `value` is guarded by `flag`,
// which upholds the usual aliasing rules at runtime.
unsafe impl<T: Send> Send for AtomicRefCell<T> {}
unsafe impl<T: Send + Sync> Sync for AtomicRefCell<T> {}

impl<T: Default> Default for AtomicRefCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> AtomicRefCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            flag: AtomicU32::new(NO_BORROWS),
        }
    }

    /// Immutably borrows the value.
    ///
    /// # Panics
    /// Panics if the value is already borrowed mutably.
    pub fn borrow(&self) -> AtomicRef<T> {
        self.try_borrow().unwrap_or_else(|e| {
            panic!(
                "failed to immutably borrow `AtomicRefCell` of type {}: {}",
                core::any::type_name::<T>(),
                e
            )
        })
    }

    /// Mutably borrows the value.
    ///
    /// # Panics
    /// Panics if the value has any existing borrows.
    pub fn borrow_mut(&self) -> AtomicRefMut<T> {
        self.try_borrow_mut().unwrap_or_else(|e| {
            panic!(
                "failed to mutably borrow `AtomicRefCell` of type {}: {}",
                core::any::type_name::<T>(),
                e
            )
        })
    }

    pub fn try_borrow(&self) -> Result<AtomicRef<T>, BorrowError> {
        let mut current = self.flag.load(Ordering::Acquire);
        loop {
            if current == MUTABLE {
                return Err(BorrowError::MutablyBorrowed);
            }
            match self.flag.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(AtomicRef { cell: self }),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn try_borrow_mut(&self) -> Result<AtomicRefMut<T>, BorrowError> {
        match self
            .flag
            .compare_exchange(NO_BORROWS, MUTABLE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(AtomicRefMut { cell: self }),
            Err(MUTABLE) => Err(BorrowError::MutablyBorrowed),
            Err(_) => Err(BorrowError::ImmutablyBorrowed),
        }
    }

    /// Returns a mutable reference without touching the flag;
    /// `&mut self` already proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    fn release_ref(&self) {
        debug_assert_ne!(self.flag.load(Ordering::Acquire), MUTABLE);
        self.flag.fetch_sub(1, Ordering::AcqRel);
    }

    fn release_mut(&self) {
        self.flag.store(NO_BORROWS, Ordering::Release);
    }
}

/// RAII guard for an immutably borrowed value.
pub struct AtomicRef<'a, T> {
    cell: &'a AtomicRefCell<T>,
}

impl<'a, T> Deref for AtomicRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: an `AtomicRef` only exists while the flag
        // counts it as an immutable borrow.
        unsafe { &*self.cell.value.get() }
    }
}

impl<'a, T> Drop for AtomicRef<'a, T> {
    fn drop(&mut self) {
        self.cell.release_ref();
    }
}

/// RAII guard for a mutably borrowed value.
pub struct AtomicRefMut<'a, T> {
    cell: &'a AtomicRefCell<T>,
}

impl<'a, T> Deref for AtomicRefMut<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: the flag is `MUTABLE` for as long as this guard lives.
        unsafe { &*self.cell.value.get() }
    }
}

impl<'a, T> DerefMut for AtomicRefMut<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: see `deref()`
        unsafe { &mut *self.cell.value.get() }
    }
}

impl<'a, T> Drop for AtomicRefMut<'a, T> {
    fn drop(&mut self) {
        self.cell.release_mut();
    }
}
