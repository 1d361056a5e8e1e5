use tock_registers::{interfaces::*, register_bitfields, register_structs, registers::*};

use super::super::{GicError, Result, SpiRouting, TriggerMode, SPI_START};
use crate::{drivers::common::MMIODerefWrapper, interrupt::IrqId, sync::MutexNoIrq};

register_bitfields! {
    u32,

    /// Distributor Control Register
    CTLR [
        EnableGrp1NS OFFSET(0) NUMBITS(1) [],
        EnableGrp1A OFFSET(1) NUMBITS(1) [],
        /// Affinity Routing Enable
        ARE OFFSET(4) NUMBITS(1) [],
        /// Register Write Pending. Read only.
        RWP OFFSET(31) NUMBITS(1) []
    ],

    /// Interrupt Controller Type Register
    TYPER [
        /// For the INTID range 32 to 1019, indicates the maximum SPI supported.
        ITLinesNumber OFFSET(0) NUMBITS(5) [],
        /// Number of interrupt identifier bits supported, minus one.
        IDbits OFFSET(19) NUMBITS(5) []
    ]
}

register_bitfields! {
    u64,

    IROUTER [
        Aff0 OFFSET(0) NUMBITS(8) [],
        Aff1 OFFSET(8) NUMBITS(8) [],
        Aff2 OFFSET(16) NUMBITS(8) [],
        /// 1: deliver to any participating core.
        InterruptRoutingMode OFFSET(31) NUMBITS(1) [],
        Aff3 OFFSET(32) NUMBITS(8) []
    ]
}

register_structs! {
    #[allow(non_snake_case)]
    RegisterBlock {
        (0x0000 => CTLR: ReadWrite<u32, CTLR::Register>),
        (0x0004 => TYPER: ReadOnly<u32, TYPER::Register>),
        (0x0008 => IIDR: ReadOnly<u32>),
        (0x000c => _reserved0),
        /// Message-based SPI, non-secure set and clear.
        (0x0040 => SETSPI_NSR: WriteOnly<u32>),
        (0x0044 => _reserved4),
        (0x0048 => CLRSPI_NSR: WriteOnly<u32>),
        (0x004c => _reserved5),
        (0x0080 => IGROUPR: [ReadWrite<u32>; 32]),
        (0x0100 => ISENABLER: [ReadWrite<u32>; 32]),
        (0x0180 => ICENABLER: [ReadWrite<u32>; 32]),
        (0x0200 => ISPENDR: [ReadWrite<u32>; 32]),
        (0x0280 => ICPENDR: [ReadWrite<u32>; 32]),
        (0x0300 => ISACTIVER: [ReadWrite<u32>; 32]),
        (0x0380 => ICACTIVER: [ReadWrite<u32>; 32]),
        (0x0400 => IPRIORITYR: [ReadWrite<u8>; 1020]),
        (0x07fc => _reserved1),
        (0x0c00 => ICFGR: [ReadWrite<u32>; 64]),
        (0x0d00 => IGRPMODR: [ReadWrite<u32>; 32]),
        (0x0d80 => _reserved2),
        /// Routing of SPIs 32..=1019.
        (0x6100 => IROUTER: [ReadWrite<u64, IROUTER::Register>; 988]),
        (0x7fe0 => _reserved3),
        (0x8000 => @END),
    }
}

/// Abstraction for the non-banked parts of the associated MMIO registers.
type Registers = MMIODerefWrapper<RegisterBlock>;

const ROUTE_ANY: u64 = 1 << 31;

/// Default priority of every SPI after reset of the distributor.
const DEFAULT_SPI_PRIORITY: u8 = 0xa0;

impl Registers {
    /// One past the largest SPI this distributor implements.
    #[inline]
    fn num_irqs(&self) -> usize {
        let lines = ((self.TYPER.read(TYPER::ITLinesNumber) as usize) + 1) * 32;
        lines.min(1020)
    }

    fn wait_for_rwp(&self) {
        let mut count = 100_0000i32;
        while self.CTLR.read(CTLR::RWP) != 0 {
            count -= 1;
            if count.is_negative() {
                panic!("arm_gicv3: rwp timeout");
            }
        }
    }
}

/// Representation of the GIC Distributor.
pub struct GicD {
    /// Access to shared registers is guarded with a lock.
    registers: MutexNoIrq<Registers>,
}

impl GicD {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide a correct MMIO start address.
    pub const unsafe fn new(mmio_start_addr: usize) -> Self {
        Self {
            registers: MutexNoIrq::new(Registers::new(mmio_start_addr)),
        }
    }

    /// Check that `id` is an SPI this distributor implements.
    fn spi(&self, id: IrqId) -> Result<usize> {
        let idx = id as usize;
        if id < SPI_START || idx >= self.registers.lock().num_irqs() {
            return Err(GicError::InvalidId(id));
        }
        Ok(idx)
    }

    /// Raise (`pending`) or retract SPI `id` as a message write.
    pub fn set_spi_message(&self, id: IrqId, pending: bool) -> Result<()> {
        self.spi(id)?;
        let regs = self.registers.lock();
        if pending {
            regs.SETSPI_NSR.set(id);
        } else {
            regs.CLRSPI_NSR.set(id);
        }
        Ok(())
    }

    /// Number of interrupt id bits the CPU interface may see.
    pub fn id_bits(&self) -> u32 {
        self.registers.lock().TYPER.read(TYPER::IDbits) + 1
    }

    /// Mask and clear every SPI, put them in group 1 at the default
    /// priority, level triggered and routed to `boot_affinity`, then enable
    /// the distributor with affinity routing.
    pub fn init(&self, boot_affinity: u64) {
        let regs = self.registers.lock();

        // disable the distributor
        regs.CTLR.set(0);
        regs.wait_for_rwp();

        let max = regs.num_irqs();

        for i in (SPI_START as usize..max).step_by(32).map(|i| i / 32) {
            regs.ICENABLER[i].set(!0);
            regs.ICPENDR[i].set(!0);
            regs.ICACTIVER[i].set(!0);
            regs.IGROUPR[i].set(!0);
            regs.IGRPMODR[i].set(0);
        }
        for i in SPI_START as usize..max {
            regs.IPRIORITYR[i].set(DEFAULT_SPI_PRIORITY);
        }
        for i in (SPI_START as usize..max).step_by(16).map(|i| i / 16) {
            regs.ICFGR[i].set(0);
        }
        regs.wait_for_rwp();

        regs.CTLR
            .write(CTLR::EnableGrp1NS::SET + CTLR::EnableGrp1A::SET + CTLR::ARE::SET);
        regs.wait_for_rwp();

        // routing only takes effect once ARE is set
        for i in SPI_START as usize..max {
            regs.IROUTER[i - SPI_START as usize].set(boot_affinity);
        }
        regs.wait_for_rwp();
    }

    pub fn enable(&self, id: IrqId) -> Result<()> {
        let idx = self.spi(id)?;
        self.registers.lock().ISENABLER[idx / 32].set(1 << (idx % 32));
        Ok(())
    }

    pub fn disable(&self, id: IrqId) -> Result<()> {
        let idx = self.spi(id)?;
        let regs = self.registers.lock();
        regs.ICENABLER[idx / 32].set(1 << (idx % 32));
        regs.wait_for_rwp();
        Ok(())
    }

    pub fn set_priority(&self, id: IrqId, raw: u8) -> Result<()> {
        let idx = self.spi(id)?;
        self.registers.lock().IPRIORITYR[idx].set(raw);
        Ok(())
    }

    pub fn priority(&self, id: IrqId) -> Result<u8> {
        let idx = self.spi(id)?;
        Ok(self.registers.lock().IPRIORITYR[idx].get())
    }

    pub fn set_trigger(&self, id: IrqId, mode: TriggerMode) -> Result<()> {
        let idx = self.spi(id)?;
        let regs = self.registers.lock();
        let reg = &regs.ICFGR[idx / 16];
        let bit = 1u32 << ((idx % 16) * 2 + 1);
        match mode {
            TriggerMode::Edge => reg.set(reg.get() | bit),
            TriggerMode::Level => reg.set(reg.get() & !bit),
        }
        Ok(())
    }

    pub fn trigger(&self, id: IrqId) -> Result<TriggerMode> {
        let idx = self.spi(id)?;
        let bit = 1u32 << ((idx % 16) * 2 + 1);
        if self.registers.lock().ICFGR[idx / 16].get() & bit != 0 {
            Ok(TriggerMode::Edge)
        } else {
            Ok(TriggerMode::Level)
        }
    }

    pub fn set_routing(&self, id: IrqId, routing: SpiRouting) -> Result<()> {
        let idx = self.spi(id)?;
        let value = match routing {
            SpiRouting::Any => ROUTE_ANY,
            SpiRouting::Affinity(aff) => aff & super::AFFINITY_MASK,
        };
        self.registers.lock().IROUTER[idx - SPI_START as usize].set(value);
        Ok(())
    }

    pub fn routing(&self, id: IrqId) -> Result<SpiRouting> {
        let idx = self.spi(id)?;
        let regs = self.registers.lock();
        let reg = &regs.IROUTER[idx - SPI_START as usize];
        if reg.is_set(IROUTER::InterruptRoutingMode) {
            Ok(SpiRouting::Any)
        } else {
            Ok(SpiRouting::Affinity(reg.get() & super::AFFINITY_MASK))
        }
    }
}
