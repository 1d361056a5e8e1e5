//! Synchronisation primitives.
//!
//! * [`spin::MutexNoIrq`] for data shared with interrupt handlers.
//! * [`preempt`] for task-level exclusion provided by the RTOS.

pub mod preempt;
pub mod spin;

pub use self::preempt::{
    BareMetal, LockTimeout, Locked, LockedGuard, Locker, NoPreemptGuard, Rtos, SpinLocker, Timeout,
};
pub use self::spin::{MutexGuardNoIrq, MutexNoIrq};
