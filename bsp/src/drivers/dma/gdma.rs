//! GDMA register layer.

use core::sync::atomic::{AtomicU32, Ordering};
use tock_registers::{interfaces::*, register_bitfields, register_structs, registers::*};

use super::{ChanHwConfig, ChanMode, ChanStatus, GdmaHw, GdmaHwError, Result};
use crate::{
    drivers::{self, common::MMIODerefWrapper, Driver},
    gdma::{bdl::TransferCtrl, config::GdmaConfig, ChanId},
    sync::MutexNoIrq,
};

register_bitfields! {
    u32,

    /// Global control
    CTL [
        ENABLE OFFSET(0) NUMBITS(1) [],
        SOFT_RESET OFFSET(1) NUMBITS(1) []
    ],

    /// Global interrupt enable, one bit per channel
    INTR_CTRL [
        CHAN OFFSET(0) NUMBITS(16) [],
        GLOBAL OFFSET(31) NUMBITS(1) []
    ],

    QOS [
        READ OFFSET(0) NUMBITS(4) [],
        WRITE OFFSET(4) NUMBITS(4) []
    ],

    CHX_CTL [
        ENABLE OFFSET(0) NUMBITS(1) [],
        SOFT_RESET OFFSET(4) NUMBITS(1) []
    ],

    CHX_MODE [
        /// Walk a descriptor list instead of the direct address registers.
        BDL OFFSET(0) NUMBITS(1) []
    ],

    /// Layout shared by the channel interrupt enable and status registers.
    CHX_INT [
        BUSY OFFSET(0) NUMBITS(1) [],
        TRANS_END OFFSET(1) NUMBITS(1) [],
        BDL_END OFFSET(2) NUMBITS(1) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    pub RegisterBlock {
        (0x00 => CTL: ReadWrite<u32, CTL::Register>),
        /// Channels with interrupt status pending.
        (0x04 => INTR_STATE: ReadOnly<u32>),
        (0x08 => INTR_CTRL: ReadWrite<u32, INTR_CTRL::Register>),
        (0x0c => LP_CTL: ReadWrite<u32>),
        (0x10 => QOS: ReadWrite<u32, QOS::Register>),
        (0x14 => _reserved0),
        (0x20 => @END),
    }
}

register_structs! {
    #[allow(non_snake_case)]
    pub ChanRegisterBlock {
        (0x00 => CTL: ReadWrite<u32, CHX_CTL::Register>),
        (0x04 => MODE: ReadWrite<u32, CHX_MODE::Register>),
        (0x08 => INT_CTL: ReadWrite<u32, CHX_INT::Register>),
        /// Write one to clear.
        (0x0c => INT_STATE: ReadWrite<u32, CHX_INT::Register>),
        /// Index of the last valid descriptor.
        (0x10 => LVI: ReadWrite<u32>),
        (0x14 => TS: ReadWrite<u32>),
        /// Source, or descriptor list in BDL mode.
        (0x18 => UPSADDR: ReadWrite<u32>),
        (0x1c => LWSADDR: ReadWrite<u32>),
        (0x20 => UPDADDR: ReadWrite<u32>),
        (0x24 => LWDADDR: ReadWrite<u32>),
        (0x28 => XFER_CFG: ReadWrite<u32>),
        (0x2c => LCP: ReadOnly<u32>),
        (0x30 => _reserved0),
        (0x60 => @END),
    }
}

type Registers = MMIODerefWrapper<RegisterBlock>;
type ChanRegisters = MMIODerefWrapper<ChanRegisterBlock>;

const CHAN_OFFSET: usize = 0x20;
const CHAN_STRIDE: usize = 0x60;
const MAX_CHANS: usize = 16;
const RESET_WAIT: usize = 100_000;

fn int_bits(status: ChanStatus) -> u32 {
    let mut bits = 0;
    if status.contains(ChanStatus::BUSY) {
        bits |= 1 << 0;
    }
    if status.contains(ChanStatus::TRANS_END) {
        bits |= 1 << 1;
    }
    if status.contains(ChanStatus::BDL_END) {
        bits |= 1 << 2;
    }
    bits
}

fn chan_status(bits: u32) -> ChanStatus {
    let mut status = ChanStatus::empty();
    status.set(ChanStatus::BUSY, bits & (1 << 0) != 0);
    status.set(ChanStatus::TRANS_END, bits & (1 << 1) != 0);
    status.set(ChanStatus::BDL_END, bits & (1 << 2) != 0);
    status
}

/// One memory-mapped GDMA controller.
pub struct GdmaMmio {
    /// Global registers are shared by every channel.
    registers: MutexNoIrq<Registers>,
    base: usize,
    chan_count: usize,
    allocated: AtomicU32,
}

impl GdmaMmio {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide a correct MMIO start address.
    pub const unsafe fn new(mmio_start_addr: usize, chan_count: usize) -> Self {
        Self {
            registers: MutexNoIrq::new(Registers::new(mmio_start_addr)),
            base: mmio_start_addr,
            chan_count: if chan_count > MAX_CHANS { MAX_CHANS } else { chan_count },
            allocated: AtomicU32::new(0),
        }
    }

    fn chan(&self, chan: ChanId) -> ChanRegisters {
        debug_assert!(chan < self.chan_count);
        unsafe { ChanRegisters::new(self.base + CHAN_OFFSET + chan * CHAN_STRIDE) }
    }

    fn reset_chan(&self, chan: ChanId) -> Result<()> {
        let regs = self.chan(chan);
        regs.CTL.write(CHX_CTL::ENABLE::CLEAR);
        regs.CTL.write(CHX_CTL::SOFT_RESET::SET);
        for _ in 0..RESET_WAIT {
            core::hint::spin_loop();
        }
        regs.CTL.write(CHX_CTL::SOFT_RESET::CLEAR);
        if regs.CTL.is_set(CHX_CTL::ENABLE) {
            return Err(GdmaHwError::Timeout);
        }
        regs.INT_STATE.set(!0);
        Ok(())
    }

    #[inline]
    fn is_allocated(&self, chan: ChanId) -> bool {
        self.allocated.load(Ordering::Acquire) & (1 << chan) != 0
    }
}

impl Driver for GdmaMmio {
    fn compatible(&self) -> &'static str {
        "phytium,gdma"
    }

    fn device_type(&self) -> drivers::DeviceType {
        drivers::DeviceType::Dma
    }
}

impl GdmaHw for GdmaMmio {
    fn configure(&self, config: &GdmaConfig) -> Result<()> {
        {
            let regs = self.registers.lock();
            regs.CTL.write(CTL::ENABLE::CLEAR + CTL::SOFT_RESET::SET);
            for _ in 0..RESET_WAIT {
                core::hint::spin_loop();
            }
            regs.CTL.write(CTL::SOFT_RESET::CLEAR);
            regs.QOS
                .write(QOS::READ.val(config.rd_qos.bits()) + QOS::WRITE.val(config.wr_qos.bits()));
            regs.INTR_CTRL.write(INTR_CTRL::GLOBAL::SET + INTR_CTRL::CHAN.val(0));
        }
        self.allocated.store(0, Ordering::Release);
        for chan in 0..self.chan_count {
            self.reset_chan(chan)?;
        }
        Ok(())
    }

    fn deconfigure(&self) {
        let regs = self.registers.lock();
        regs.INTR_CTRL.set(0);
        regs.CTL.write(CTL::ENABLE::CLEAR);
        self.allocated.store(0, Ordering::Release);
    }

    fn start(&self) -> Result<()> {
        self.registers.lock().CTL.modify(CTL::ENABLE::SET);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let regs = self.registers.lock();
        regs.CTL.modify(CTL::ENABLE::CLEAR);
        if regs.CTL.is_set(CTL::ENABLE) {
            return Err(GdmaHwError::Timeout);
        }
        Ok(())
    }

    fn allocate_chan(&self, chan: ChanId, config: &ChanHwConfig) -> Result<()> {
        if chan >= self.chan_count {
            return Err(GdmaHwError::Unsupported);
        }
        let bit = 1 << chan;
        if self.allocated.fetch_or(bit, Ordering::AcqRel) & bit != 0 {
            return Err(GdmaHwError::ChanInUse(chan));
        }
        if let Err(e) = self.reset_chan(chan) {
            self.allocated.fetch_and(!bit, Ordering::AcqRel);
            return Err(e);
        }

        let regs = self.chan(chan);
        match config.mode {
            ChanMode::Bdl { list_addr, entries } => {
                regs.MODE.write(CHX_MODE::BDL::SET);
                regs.UPSADDR.set((list_addr as u64 >> 32) as u32);
                regs.LWSADDR.set(list_addr as u32);
                regs.LVI.set(entries.saturating_sub(1));
            }
            ChanMode::Direct { src, dst, len } => {
                regs.MODE.write(CHX_MODE::BDL::CLEAR);
                regs.UPSADDR.set((src as u64 >> 32) as u32);
                regs.LWSADDR.set(src as u32);
                regs.UPDADDR.set((dst as u64 >> 32) as u32);
                regs.LWDADDR.set(dst as u32);
                regs.TS.set(len);
                regs.XFER_CFG.set(TransferCtrl::memcpy().bits());
            }
        }
        regs.INT_CTL.set(int_bits(config.irq_events));
        self.registers
            .lock()
            .INTR_CTRL
            .modify(INTR_CTRL::CHAN.val(self.allocated.load(Ordering::Acquire)));
        Ok(())
    }

    fn deallocate_chan(&self, chan: ChanId) -> Result<()> {
        if chan >= self.chan_count || !self.is_allocated(chan) {
            return Err(GdmaHwError::ChanNotAllocated(chan));
        }
        let result = self.stop_chan(chan);
        self.chan(chan).INT_CTL.set(0);
        let remaining = self.allocated.fetch_and(!(1 << chan), Ordering::AcqRel) & !(1 << chan);
        self.registers
            .lock()
            .INTR_CTRL
            .modify(INTR_CTRL::CHAN.val(remaining));
        result
    }

    fn start_transfer(&self, chan: ChanId) -> Result<()> {
        if chan >= self.chan_count || !self.is_allocated(chan) {
            return Err(GdmaHwError::ChanNotAllocated(chan));
        }
        self.chan(chan).CTL.modify(CHX_CTL::ENABLE::SET);
        Ok(())
    }

    fn stop_chan(&self, chan: ChanId) -> Result<()> {
        if chan >= self.chan_count {
            return Err(GdmaHwError::ChanNotAllocated(chan));
        }
        self.reset_chan(chan)
    }

    fn pending_channels(&self) -> u32 {
        self.registers.lock().INTR_STATE.get() & ((1 << self.chan_count) - 1)
    }

    fn take_status(&self, chan: ChanId) -> ChanStatus {
        let regs = self.chan(chan);
        let bits = regs.INT_STATE.get();
        regs.INT_STATE.set(bits);
        chan_status(bits)
    }
}
