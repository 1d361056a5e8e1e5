//! One-time measurement of how the running-priority register reports
//! priorities.
//!
//! When the secure world owns the GIC, non-secure software sees its
//! priorities shifted right by one with the top bit set. The probe raises a
//! timer interrupt twice at adjacent logical priorities and compares the two
//! running priorities it observes: a distance of 8 means the shifted view.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use super::{vector::IrqHandler, IrqId, PRIORITY_SHIFT};
use crate::drivers::{irq::GicOps, Driver};

/// Logical priority of the first probe interrupt.
pub const PROBE_PRIORITY: u8 = 8;
/// Ticks before the first probe fires.
pub const PROBE_FIRST_COUNTDOWN: u32 = 1000;

/// Distance between adjacent logical priorities in the shifted view.
const STEP_SHIFTED: u8 = 8;
/// Distance in the full view.
const STEP_FULL: u8 = 16;

/// Countdown timer used to raise the probe interrupt.
pub trait StepTimer: Driver {
    fn irq(&self) -> IrqId;

    fn stop(&self);
    fn start(&self);
    fn set_countdown(&self, ticks: u32);

    fn enable_interrupt(&self);
    fn disable_interrupt(&self);

    /// Leave interrupts open for about 100 µs so the probe can fire twice.
    fn settle(&self);
}

/// Raw priority as written, to the shifted view.
#[inline]
pub const fn translate_set(raw: u8) -> u8 {
    (raw >> 1) | 0x80
}

/// Shifted view back to the raw priority.
#[inline]
pub const fn translate_get(raw: u8) -> u8 {
    (raw & 0x7f) << 1
}

/// Whether a measured step means translation is needed.
pub fn classify_step(step: u8) -> bool {
    match step {
        STEP_SHIFTED => true,
        STEP_FULL => false,
        other => {
            warn!("unexpected priority step {}, assuming no translation", other);
            false
        }
    }
}

/// The two running-priority samples.
#[derive(Debug, Default)]
pub struct StepProbe {
    samples: [AtomicU8; 2],
    count: AtomicUsize,
}

impl StepProbe {
    pub const fn new() -> Self {
        StepProbe {
            samples: [AtomicU8::new(0), AtomicU8::new(0)],
            count: AtomicUsize::new(0),
        }
    }

    /// Store a sample. Returns how many samples exist now, or `None` once
    /// both are taken.
    pub fn record(&self, running: u8) -> Option<usize> {
        let n = self.count.fetch_add(1, Ordering::AcqRel);
        let slot = self.samples.get(n)?;
        slot.store(running, Ordering::Release);
        Some(n + 1)
    }

    /// `sample[1] - sample[0]`, once both exist.
    pub fn step(&self) -> Option<u8> {
        if self.count.load(Ordering::Acquire) < 2 {
            return None;
        }
        let first = self.samples[0].load(Ordering::Acquire);
        let second = self.samples[1].load(Ordering::Acquire);
        Some(second.wrapping_sub(first))
    }
}

/// Timer handler that takes the samples.
pub(crate) struct ProbeHandler<G> {
    pub gic: Arc<G>,
    pub timer: Arc<dyn StepTimer>,
    pub probe: Arc<StepProbe>,
}

impl<G: GicOps> IrqHandler for ProbeHandler<G> {
    fn handle(&self, id: IrqId) {
        match self.probe.record(self.gic.running_priority()) {
            Some(1) => {
                // re-fire one level less urgent
                let raw = (PROBE_PRIORITY + 1) << PRIORITY_SHIFT;
                if let Err(e) = self.gic.set_priority(id, raw) {
                    warn!("priority probe: {}", e);
                }
                self.timer.set_countdown(1);
            }
            Some(_) => {
                self.timer.stop();
                self.timer.disable_interrupt();
                if let Err(e) = self.gic.disable(id) {
                    warn!("priority probe: {}", e);
                }
            }
            None => {}
        }
    }
}
