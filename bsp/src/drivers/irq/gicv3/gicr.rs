use tock_registers::{interfaces::*, register_bitfields, register_structs, registers::*};

use super::super::{GicError, Result, TriggerMode, SPI_START};
use crate::{drivers::common::MMIODerefWrapper, interrupt::IrqId};

register_bitfields! {
    u32,
    /// Controls the operation of a Redistributor, and enables the signaling of LPIs by the Redistributor to
    /// the connected PE.
    CTLR [
        EnableLPIs OFFSET(0) NUMBITS(1) [],
        /// Register Write Pending. This bit indicates whether a register write for the current Security state is
        /// in progress or not.
        RWP OFFSET(3) NUMBITS(1) []
    ],

    WAKER [
        ProcessorSleep OFFSET(1) NUMBITS(1) [],
        ChildrenAsleep OFFSET(2) NUMBITS(1) []
    ]
}

register_bitfields! {
    u64,

    TYPER [
        PLPIS OFFSET(0) NUMBITS(1) [],
        /// This is the last redistributor frame.
        Last OFFSET(4) NUMBITS(1) [],
        Affinity OFFSET(32) NUMBITS(32) []
    ],

    PROPBASER [
        IDbits OFFSET(0) NUMBITS(5) [],
        InnerCache OFFSET(7) NUMBITS(3) [
            WriteBackAllocate = 0b111
        ],
        Shareability OFFSET(10) NUMBITS(2) [
            Inner = 0b01
        ],
        PhysicalAddress OFFSET(12) NUMBITS(40) []
    ],

    PENDBASER [
        InnerCache OFFSET(7) NUMBITS(3) [
            WriteBackAllocate = 0b111
        ],
        Shareability OFFSET(10) NUMBITS(2) [
            Inner = 0b01
        ],
        PhysicalAddress OFFSET(16) NUMBITS(36) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    pub RdBasedRegisterBlock {
        (0x0000 => CTLR: ReadWrite<u32, CTLR::Register>),
        (0x0004 => IIDR: ReadOnly<u32>),
        (0x0008 => TYPER: ReadOnly<u64, TYPER::Register>),
        (0x0010 => STATUSR: ReadWrite<u32>),
        (0x0014 => WAKER: ReadWrite<u32, WAKER::Register>),
        (0x0018 => _reserved0),
        (0x0070 => PROPBASER: ReadWrite<u64, PROPBASER::Register>),
        (0x0078 => PENDBASER: ReadWrite<u64, PENDBASER::Register>),
        (0x0080 => _reserved1),
        (0x0100 => @END),
    }
}

register_structs! {
    #[allow(non_snake_case)]
    pub SgiBasedRegisterBlock {
        (0x0000 => _reserved0),
        (0x0080 => IGROUPR0: ReadWrite<u32>),
        (0x0084 => _reserved1),
        /// Enables forwarding of the corresponding SGI or PPI to the CPU interfaces.
        (0x0100 => ISENABLER0: ReadWrite<u32>),
        (0x0104 => _reserved2),
        (0x0180 => ICENABLER0: ReadWrite<u32>),
        (0x0184 => _reserved3),
        (0x0280 => ICPENDR0: ReadWrite<u32>),
        (0x0284 => _reserved4),
        (0x0380 => ICACTIVER0: ReadWrite<u32>),
        (0x0384 => _reserved5),
        (0x0400 => IPRIORITYR: [ReadWrite<u8>; 32]),
        (0x0420 => _reserved6),
        (0x0c00 => ICFGR0: ReadWrite<u32>),
        (0x0c04 => ICFGR1: ReadWrite<u32>),
        (0x0c08 => _reserved7),
        (0x0d00 => IGRPMODR0: ReadWrite<u32>),
        (0x0d04 => _reserved8),
        (0x0E00 => @END),
    }
}

/// Abstraction for the associated MMIO registers.
type RdBasedRegisters = MMIODerefWrapper<RdBasedRegisterBlock>;
type SgiBasedRegisters = MMIODerefWrapper<SgiBasedRegisterBlock>;

/// RD_base and SGI_base, 64 KiB each.
pub const FRAME_STRIDE: usize = 0x20000;
const SGI_FRAME_OFFSET: usize = 0x10000;

const SGI_PRIORITY: u8 = 0x90;
const PPI_PRIORITY: u8 = 0xa0;

/// The redistributor of one core.
pub struct GicR {
    rd_based_registers: RdBasedRegisters,
    sgi_based_registers: SgiBasedRegisters,
}

impl GicR {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide a correct MMIO start address.
    pub const unsafe fn new(mmio_start_addr: usize) -> Self {
        Self {
            rd_based_registers: RdBasedRegisters::new(mmio_start_addr),
            sgi_based_registers: SgiBasedRegisters::new(mmio_start_addr + SGI_FRAME_OFFSET),
        }
    }

    /// Walk the redistributor frames from `base` to the one serving
    /// `affinity` (MPIDR layout).
    ///
    /// # Safety
    ///
    /// - `base` must be the first redistributor frame of the GIC.
    pub unsafe fn find(base: usize, affinity: u64) -> Option<Self> {
        let wanted = (((affinity >> 32) & 0xff) << 24) | (affinity & 0xff_ffff);
        let mut addr = base;
        loop {
            let frame = Self::new(addr);
            let typer = &frame.rd_based_registers.TYPER;
            if typer.read(TYPER::Affinity) == wanted {
                return Some(frame);
            }
            if typer.is_set(TYPER::Last) {
                return None;
            }
            addr += FRAME_STRIDE;
        }
    }

    #[inline]
    pub fn base(&self) -> usize {
        self.rd_based_registers.start_addr()
    }

    #[inline]
    pub fn is_last(&self) -> bool {
        self.rd_based_registers.TYPER.is_set(TYPER::Last)
    }

    #[inline]
    fn private(id: IrqId) -> Result<usize> {
        if id >= SPI_START {
            return Err(GicError::InvalidId(id));
        }
        Ok(id as usize)
    }

    fn wakeup(&self) {
        self.rd_based_registers
            .WAKER
            .modify(WAKER::ProcessorSleep::CLEAR);
        while self.rd_based_registers.WAKER.read(WAKER::ChildrenAsleep) != 0 {
            core::hint::spin_loop();
        }
    }

    pub fn init(&self) {
        self.wakeup();

        let regs = &self.sgi_based_registers;

        // set the priority on PPI and SGI
        for i in 0..16 {
            regs.IPRIORITYR[i].set(SGI_PRIORITY);
        }
        for i in 16..32 {
            regs.IPRIORITYR[i].set(PPI_PRIORITY);
        }

        // disable all PPI and enable all SGI.
        regs.ICENABLER0.set(0xffff_0000);
        regs.ISENABLER0.set(0x0000_ffff);

        // configure sgi/ppi as non-secure group 1.
        regs.IGROUPR0.set(0xffff_ffff);
        regs.IGRPMODR0.set(0);

        self.wait_for_rwp();
        crate::cpu::isb();
    }

    pub fn enable(&self, id: IrqId) -> Result<()> {
        let idx = Self::private(id)?;
        self.sgi_based_registers.ISENABLER0.set(1 << idx);
        Ok(())
    }

    pub fn disable(&self, id: IrqId) -> Result<()> {
        let idx = Self::private(id)?;
        self.sgi_based_registers.ICENABLER0.set(1 << idx);
        self.wait_for_rwp();
        Ok(())
    }

    pub fn set_priority(&self, id: IrqId, raw: u8) -> Result<()> {
        let idx = Self::private(id)?;
        self.sgi_based_registers.IPRIORITYR[idx].set(raw);
        Ok(())
    }

    pub fn priority(&self, id: IrqId) -> Result<u8> {
        let idx = Self::private(id)?;
        Ok(self.sgi_based_registers.IPRIORITYR[idx].get())
    }

    /// SGIs are always edge triggered; only PPIs are configurable.
    pub fn set_trigger(&self, id: IrqId, mode: TriggerMode) -> Result<()> {
        let idx = Self::private(id)?;
        if idx < 16 {
            return Err(GicError::InvalidId(id));
        }
        let reg = &self.sgi_based_registers.ICFGR1;
        let bit = 1u32 << ((idx - 16) * 2 + 1);
        match mode {
            TriggerMode::Edge => reg.set(reg.get() | bit),
            TriggerMode::Level => reg.set(reg.get() & !bit),
        }
        Ok(())
    }

    pub fn trigger(&self, id: IrqId) -> Result<TriggerMode> {
        let idx = Self::private(id)?;
        if idx < 16 {
            return Ok(TriggerMode::Edge);
        }
        let bit = 1u32 << ((idx - 16) * 2 + 1);
        if self.sgi_based_registers.ICFGR1.get() & bit != 0 {
            Ok(TriggerMode::Edge)
        } else {
            Ok(TriggerMode::Level)
        }
    }

    /// Point this redistributor at the LPI configuration and pending
    /// tables, then turn LPIs on.
    pub fn enable_lpis(&self, prop_table: usize, id_bits: u32, pend_table: usize) -> Result<()> {
        let rd = &self.rd_based_registers;
        if !rd.TYPER.is_set(TYPER::PLPIS) {
            return Err(GicError::ItsUnavailable);
        }
        rd.CTLR.modify(CTLR::EnableLPIs::CLEAR);
        rd.PROPBASER.write(
            PROPBASER::IDbits.val((id_bits - 1) as u64)
                + PROPBASER::InnerCache::WriteBackAllocate
                + PROPBASER::Shareability::Inner
                + PROPBASER::PhysicalAddress.val((prop_table >> 12) as u64),
        );
        rd.PENDBASER.write(
            PENDBASER::InnerCache::WriteBackAllocate
                + PENDBASER::Shareability::Inner
                + PENDBASER::PhysicalAddress.val((pend_table >> 16) as u64),
        );
        rd.CTLR.modify(CTLR::EnableLPIs::SET);
        crate::cpu::isb();
        Ok(())
    }

    fn wait_for_rwp(&self) {
        let mut count = 100_0000i32;
        while self.rd_based_registers.CTLR.read(CTLR::RWP) != 0 {
            count -= 1;
            if count.is_negative() {
                panic!("arm_gicv3: rwp timeout");
            }
        }
    }
}
