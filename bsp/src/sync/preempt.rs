//! Task-level exclusion supplied by the host RTOS.
//!
//! The BSP never talks to a scheduler directly. It asks an [`Rtos`] for two
//! things: suspending task switching on the calling core, and mutual
//! exclusion objects with bounded waits. [`BareMetal`] provides both without
//! any scheduler.

use alloc::boxed::Box;
use core::{
    cell::UnsafeCell,
    fmt,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Upper bound on a lock wait, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timeout(pub u64);

impl Timeout {
    /// Fail at once if the lock is taken.
    pub const IMMEDIATE: Timeout = Timeout(0);
    pub const DEFAULT: Timeout = Timeout(1000);

    #[inline]
    pub const fn millis(self) -> u64 {
        self.0
    }

    /// The wait in ticks of a counter running at `freq` Hz.
    #[inline]
    pub const fn ticks_at(self, freq: u64) -> u64 {
        self.0.saturating_mul(freq) / 1000
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Timeout::DEFAULT
    }
}

/// A blocking mutual-exclusion object.
pub trait Locker: Send + Sync {
    /// Returns `false` when `timeout` expired before the lock was taken.
    fn acquire(&self, timeout: Timeout) -> bool;

    fn release(&self);
}

/// The concurrency substrate.
pub trait Rtos: Send + Sync {
    /// Stop task switching on the calling core. Interrupts stay enabled.
    /// Calls nest.
    fn suspend_scheduler(&self);

    fn resume_scheduler(&self);

    /// `None` when the substrate is out of objects.
    fn create_locker(&self) -> Option<Box<dyn Locker>>;
}

/// Scheduler suspension for the lifetime of the guard.
pub struct NoPreemptGuard<'a> {
    rtos: &'a dyn Rtos,
}

impl<'a> NoPreemptGuard<'a> {
    pub fn new(rtos: &'a dyn Rtos) -> Self {
        rtos.suspend_scheduler();
        NoPreemptGuard { rtos }
    }
}

impl Drop for NoPreemptGuard<'_> {
    fn drop(&mut self) {
        self.rtos.resume_scheduler();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockTimeout;

impl fmt::Display for LockTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("lock wait timed out")
    }
}

/// Data guarded by a [`Locker`].
pub struct Locked<T> {
    locker: Box<dyn Locker>,
    data: UnsafeCell<T>,
}

// The locker serialises every access to `data`.
unsafe impl<T: Send> Sync for Locked<T> {}
unsafe impl<T: Send> Send for Locked<T> {}

impl<T> Locked<T> {
    pub fn new(locker: Box<dyn Locker>, data: T) -> Self {
        Locked {
            locker,
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock(&self, timeout: Timeout) -> Result<LockedGuard<'_, T>, LockTimeout> {
        if self.locker.acquire(timeout) {
            Ok(LockedGuard { lock: self })
        } else {
            Err(LockTimeout)
        }
    }

    #[inline]
    pub fn try_lock(&self) -> Result<LockedGuard<'_, T>, LockTimeout> {
        self.lock(Timeout::IMMEDIATE)
    }

    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub struct LockedGuard<'a, T> {
    lock: &'a Locked<T>,
}

impl<T> Deref for LockedGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for LockedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for LockedGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.locker.release();
    }
}

/// Spin locker whose waits are measured on the architectural counter.
#[derive(Debug, Default)]
pub struct SpinLocker {
    held: AtomicBool,
}

impl SpinLocker {
    pub const fn new() -> Self {
        SpinLocker {
            held: AtomicBool::new(false),
        }
    }

    #[inline]
    fn try_take(&self) -> bool {
        self.held
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }
}

impl Locker for SpinLocker {
    fn acquire(&self, timeout: Timeout) -> bool {
        let budget = timeout.ticks_at(crate::arch::timer::freq());
        let start = crate::arch::timer::ticks();
        loop {
            if self.try_take() {
                return true;
            }
            if crate::arch::timer::ticks().wrapping_sub(start) >= budget {
                return false;
            }
            core::hint::spin_loop();
        }
    }

    fn release(&self) {
        self.held.store(false, Ordering::Release);
    }
}

/// Substrate for running without an RTOS: there is no scheduler to
/// suspend, only a nesting count for diagnostics.
#[derive(Debug, Default)]
pub struct BareMetal {
    suspended: AtomicUsize,
}

impl BareMetal {
    pub const fn new() -> Self {
        BareMetal {
            suspended: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn suspend_depth(&self) -> usize {
        self.suspended.load(Ordering::Relaxed)
    }
}

impl Rtos for BareMetal {
    fn suspend_scheduler(&self) {
        self.suspended.fetch_add(1, Ordering::Relaxed);
    }

    fn resume_scheduler(&self) {
        let prev = self.suspended.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "scheduler resumed more often than suspended");
    }

    fn create_locker(&self) -> Option<Box<dyn Locker>> {
        Some(Box::new(SpinLocker::new()))
    }
}
