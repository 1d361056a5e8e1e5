//! Trap handler

use aarch64_cpu::registers::*;
use core::arch::global_asm;

use crate::interrupt::dispatch::{self, TrapFrame};

global_asm!(include_str!("vector.S"));

extern "C" {
    static __exception_vectors: u8;
}

/// Point VBAR_EL1 at the vector table. Called once per core.
pub fn init() {
    let base = unsafe { &__exception_vectors as *const u8 as u64 };
    VBAR_EL1.set(base);
    crate::cpu::isb();
}

/// Called from `vector.S` with the frame it pushed on the stack.
#[no_mangle]
extern "C" fn trap_handler(tf: &mut TrapFrame) {
    let esr = ESR_EL1.get();
    let far = FAR_EL1.get();
    dispatch::handle_trap(tf, esr, far);
}
