//! Interrupt and exception glue for aarch64.

use aarch64_cpu::registers::*;
use core::arch::asm;

use crate::interrupt::nested::{IrqMode, SavedContext};

pub mod handler;

/// Enable the interrupt (only IRQ).
#[inline(always)]
pub unsafe fn enable() {
    asm!("msr daifclr, #2", options(nomem, nostack));
}

/// Disable the interrupt (only IRQ).
#[inline(always)]
pub unsafe fn disable() {
    asm!("msr daifset, #2", options(nomem, nostack));
}

/// Disable the interrupt and store the status.
///
/// return: status(usize)
#[inline(always)]
pub unsafe fn disable_and_store() -> usize {
    let daif = DAIF.get() as usize;
    disable();
    daif
}

/// Use the original status to restore the process
///
/// Arguments:
/// * flags:  original status(usize)
#[inline(always)]
pub unsafe fn restore(flags: usize) {
    DAIF.set(flags as u64);
}

/// Nesting support for EL1 IRQ handlers.
///
/// ELR_EL1 and SPSR_EL1 are the only state a nested exception clobbers,
/// everything else is already on the trap frame.
pub struct El1IrqMode;

impl IrqMode for El1IrqMode {
    fn save(&self) -> SavedContext {
        SavedContext {
            elr: ELR_EL1.get(),
            spsr: SPSR_EL1.get(),
        }
    }

    fn unmask(&self) {
        unsafe { enable() }
    }

    fn mask(&self) {
        unsafe { disable() }
    }

    fn restore(&self, ctx: &SavedContext) {
        ELR_EL1.set(ctx.elr);
        SPSR_EL1.set(ctx.spsr);
    }
}
