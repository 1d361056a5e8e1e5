use aarch64_cpu::registers::*;

use crate::drivers::{self, Driver};
use crate::interrupt::{calibrate::StepTimer, IrqId};

/// Non-secure EL1 physical timer PPI.
pub const GENERIC_TIMER_NS_IRQ: IrqId = 30;

#[inline]
pub fn freq() -> u64 {
    CNTFRQ_EL0.get()
}

#[inline]
pub fn ticks() -> u64 {
    CNTPCT_EL0.get()
}

/// Busy-wait for `us` microseconds.
pub fn delay_us(us: u64) {
    let end = ticks() + freq() * us / 1_000_000;
    while ticks() < end {
        core::hint::spin_loop();
    }
}

/// The EL1 physical generic timer, driven as a one-shot countdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericTimer {}

impl GenericTimer {
    #[inline]
    pub const fn new() -> Self {
        GenericTimer {}
    }
}

impl Driver for GenericTimer {
    fn compatible(&self) -> &'static str {
        "arm,armv8-timer"
    }

    fn device_type(&self) -> drivers::DeviceType {
        drivers::DeviceType::Timer
    }
}

impl StepTimer for GenericTimer {
    fn irq(&self) -> IrqId {
        GENERIC_TIMER_NS_IRQ
    }

    fn stop(&self) {
        CNTP_CTL_EL0.modify(CNTP_CTL_EL0::ENABLE::CLEAR);
    }

    fn start(&self) {
        CNTP_CTL_EL0.modify(CNTP_CTL_EL0::ENABLE::SET);
    }

    fn set_countdown(&self, ticks: u32) {
        CNTP_TVAL_EL0.set(ticks as u64);
    }

    fn enable_interrupt(&self) {
        CNTP_CTL_EL0.modify(CNTP_CTL_EL0::IMASK::CLEAR);
    }

    fn disable_interrupt(&self) {
        CNTP_CTL_EL0.modify(CNTP_CTL_EL0::IMASK::SET);
    }

    fn settle(&self) {
        unsafe { super::interrupt::enable() };
        delay_us(100);
        unsafe { super::interrupt::disable() };
    }
}
