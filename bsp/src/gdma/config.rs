use bitflags::bitflags;

use super::ChanId;
use crate::interrupt::IrqId;

/// Logical priority the GDMA vectors run at.
pub const GDMA_IRQ_PRIORITY: u8 = 12;

bitflags! {
    pub struct GdmaCaps: u32 {
        /// Descriptor-list transfers.
        const BDL = 1 << 0;
        /// Single register-programmed transfers.
        const DIRECT = 1 << 1;
    }
}

/// Bus arbitration of reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Qos {
    /// Round robin, no priority.
    Poll,
    Priority(u8),
}

impl Qos {
    /// 4-bit register field: enable at bit 3, level 0..=7 below it.
    pub fn bits(self) -> u32 {
        match self {
            Qos::Poll => 0,
            Qos::Priority(level) => 0x8 | (level & 0x7) as u32,
        }
    }
}

/// Static description of one GDMA controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GdmaConfig {
    pub instance_id: usize,
    pub base_addr: usize,
    /// One id per channel, or a single id shared by every channel.
    pub irqs: &'static [IrqId],
    /// Logical priority. `Gdma::init` replaces it with [`GDMA_IRQ_PRIORITY`].
    pub irq_priority: u8,
    pub chan_count: usize,
    pub caps: GdmaCaps,
    pub rd_qos: Qos,
    pub wr_qos: Qos,
    /// Bytes of descriptor memory owned by the instance.
    pub pool_size: usize,
}

impl GdmaConfig {
    #[inline]
    pub fn shared_irq(&self) -> bool {
        self.irqs.len() == 1
    }

    /// Vector serving `chan`.
    pub fn irq_of(&self, chan: ChanId) -> Option<IrqId> {
        if chan >= self.chan_count {
            return None;
        }
        if self.shared_irq() {
            self.irqs.first().copied()
        } else {
            self.irqs.get(chan).copied()
        }
    }
}
