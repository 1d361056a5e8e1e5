use core::{
    fmt,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
};
use spin::MutexGuard;

pub type Mutex<T> = spin::Mutex<T>;

/// A spin lock that keeps IRQs masked on the local core while held.
///
/// Safe to take from both task and interrupt context.
pub struct MutexNoIrq<T>(Mutex<T>);

unsafe impl<T: Send> Sync for MutexNoIrq<T> {}
unsafe impl<T: Send> Send for MutexNoIrq<T> {}

impl<T> MutexNoIrq<T> {
    #[inline]
    pub const fn new(value: T) -> Self {
        Self(Mutex::new(value))
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.0.into_inner()
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// The answer is out of date as soon as it is returned. Only use it as a
    /// heuristic.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.0.is_locked()
    }

    /// Mask IRQs, then spin until the lock is taken.
    #[inline]
    pub fn lock(&self) -> MutexGuardNoIrq<T> {
        let flags = unsafe { crate::arch::interrupt::disable_and_store() };
        MutexGuardNoIrq {
            inner: ManuallyDrop::new(self.0.lock()),
            flags,
        }
    }

    /// Try to lock without spinning. IRQ state is untouched on failure.
    #[inline]
    pub fn try_lock(&self) -> Option<MutexGuardNoIrq<T>> {
        let flags = unsafe { crate::arch::interrupt::disable_and_store() };
        match self.0.try_lock() {
            Some(inner) => Some(MutexGuardNoIrq {
                inner: ManuallyDrop::new(inner),
                flags,
            }),
            None => {
                unsafe { crate::arch::interrupt::restore(flags) };
                None
            }
        }
    }

    /// Returns a mutable reference to the underlying data.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.0.get_mut()
    }
}

impl<T: fmt::Debug> fmt::Debug for MutexNoIrq<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<T: Default> Default for MutexNoIrq<T> {
    fn default() -> MutexNoIrq<T> {
        Self::new(Default::default())
    }
}

impl<T> From<T> for MutexNoIrq<T> {
    fn from(data: T) -> Self {
        Self::new(data)
    }
}

pub struct MutexGuardNoIrq<'a, T: 'a> {
    inner: ManuallyDrop<MutexGuard<'a, T>>,
    flags: usize,
}

impl<'a, T: 'a> Drop for MutexGuardNoIrq<'a, T> {
    fn drop(&mut self) {
        // unlock before IRQs come back, or a handler on this core could spin
        // on a lock its own interrupted context holds
        unsafe {
            ManuallyDrop::drop(&mut self.inner);
            crate::arch::interrupt::restore(self.flags)
        }
    }
}

impl<'a, T: fmt::Debug> fmt::Debug for MutexGuardNoIrq<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(&**self, f)
    }
}

impl<'a, T: 'a> Deref for MutexGuardNoIrq<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &**self.inner
    }
}

impl<'a, T: 'a> DerefMut for MutexGuardNoIrq<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut **self.inner
    }
}
