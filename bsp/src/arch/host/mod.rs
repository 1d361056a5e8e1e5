//! Hosted stand-in for the AArch64 glue, used when the crate is built for
//! anything other than bare-metal AArch64 (unit and integration tests).
//!
//! It mirrors the surface of `arch/aarch64` so the rest of the crate stays
//! architecture-neutral. Nothing here touches real hardware.

pub const ARCH: &str = "host";

pub mod cpu {
    use core::hint::spin_loop;

    /// The host always reports the boot core.
    #[inline]
    pub fn id() -> usize {
        0
    }

    pub fn halt() {
        spin_loop();
    }

    pub fn wait_forever() -> ! {
        loop {
            spin_loop();
        }
    }
}

pub mod interrupt {
    use core::sync::atomic::{AtomicUsize, Ordering};

    /// Mirrors the DAIF.I bit.
    const IRQ_MASKED: usize = 1 << 7;

    static DAIF: AtomicUsize = AtomicUsize::new(0);

    #[inline]
    pub unsafe fn enable() {
        DAIF.fetch_and(!IRQ_MASKED, Ordering::SeqCst);
    }

    #[inline]
    pub unsafe fn disable() {
        DAIF.fetch_or(IRQ_MASKED, Ordering::SeqCst);
    }

    #[inline]
    pub unsafe fn disable_and_store() -> usize {
        DAIF.fetch_or(IRQ_MASKED, Ordering::SeqCst)
    }

    #[inline]
    pub unsafe fn restore(flags: usize) {
        DAIF.store(flags, Ordering::SeqCst);
    }
}

pub mod timer {
    use core::sync::atomic::{AtomicU64, Ordering};

    static TICKS: AtomicU64 = AtomicU64::new(0);

    /// Nominal rate: one tick per millisecond.
    #[inline]
    pub fn freq() -> u64 {
        1000
    }

    /// Monotonic tick source. Every read advances the clock by one tick so
    /// bounded waits always terminate.
    #[inline]
    pub fn ticks() -> u64 {
        TICKS.fetch_add(1, Ordering::Relaxed)
    }
}

pub mod console {
    use core::fmt;

    pub struct NullConsole;

    impl fmt::Write for NullConsole {
        fn write_str(&mut self, _s: &str) -> fmt::Result {
            Ok(())
        }
    }

    pub fn console() -> NullConsole {
        NullConsole
    }
}
