use aarch64_cpu::{
    asm::{self, barrier},
    registers::*,
};

/// Affinity fields of MPIDR_EL1 (Aff3 at [39:32], Aff2..Aff0 at [23:0]).
pub const MPIDR_AFFINITY_MASK: u64 = 0xff_00ff_ffff;

#[inline]
pub fn halt() {
    asm::wfi();
}

pub fn wait_forever() -> ! {
    loop {
        asm::wfe();
    }
}

#[inline]
pub fn isb() {
    barrier::isb(barrier::SY);
}

/// Affinity of the calling core.
#[inline]
pub fn affinity() -> u64 {
    MPIDR_EL1.get() & MPIDR_AFFINITY_MASK
}

/// Logical id of the calling core, from the board affinity table.
pub fn id() -> usize {
    let aff = affinity();
    crate::board::CPU_AFFINITY
        .iter()
        .position(|&a| a == aff)
        .unwrap_or(0)
}
