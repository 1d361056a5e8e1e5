//! ARM GICv3: distributor and redistributors over MMIO, CPU interface over
//! system registers.

use aarch64_cpu::asm::barrier;
use alloc::{
    alloc::{alloc_zeroed, Layout},
    vec::Vec,
};
use spin::Once;

use super::{GicError, GicOps, Result, SgiTarget, SpiRouting, TriggerMode, SGI_MAX, SPI_START};
use crate::{
    arch::gic::*,
    drivers::{self, Driver},
    interrupt::{IrqId, LPI_START},
};

mod gicd;
mod gicr;

/// Affinity fields of MPIDR / IROUTER.
const AFFINITY_MASK: u64 = 0xff_00ff_ffff;
/// Last id of the SPI range.
const SPI_END: IrqId = 1019;

/// LPI enable bit in a configuration table entry.
const LPI_ENABLE: u8 = 1 << 0;
const LPI_PRIORITY_MASK: u8 = 0xfc;
const LPI_DEFAULT_PRIORITY: u8 = 0xa0;

/// Shared LPI configuration table, one byte per LPI.
struct LpiTable {
    base: usize,
    len: usize,
}

impl LpiTable {
    fn entry(&self, id: IrqId) -> Result<*mut u8> {
        let idx = (id - LPI_START) as usize;
        if idx >= self.len {
            return Err(GicError::InvalidId(id));
        }
        Ok((self.base + idx) as *mut u8)
    }

    fn update(&self, id: IrqId, f: impl FnOnce(u8) -> u8) -> Result<()> {
        let entry = self.entry(id)?;
        unsafe { entry.write_volatile(f(entry.read_volatile())) };
        barrier::dsb(barrier::SY);
        Ok(())
    }
}

/// Representation of the GIC.
pub struct GicV3 {
    /// The Distributor.
    gicd: gicd::GicD,
    gicr_base: usize,
    /// Redistributor of each logical core, found during its bring-up.
    gicr: Vec<Once<gicr::GicR>>,
    lpi_count: usize,
    lpis: Once<LpiTable>,
}

impl GicV3 {
    /// Create an instance for `cpus` logical cores.
    ///
    /// # Safety
    ///
    /// - The user must ensure to provide correct MMIO start addresses.
    pub unsafe fn new(gicd_mmio_start_addr: usize, gicr_mmio_start_addr: usize, cpus: usize, lpi_count: usize) -> Self {
        Self {
            gicd: gicd::GicD::new(gicd_mmio_start_addr),
            gicr_base: gicr_mmio_start_addr,
            gicr: (0..cpus).map(|_| Once::new()).collect(),
            lpi_count,
            lpis: Once::new(),
        }
    }

    /// Redistributor of the calling core.
    fn local(&self) -> Result<&gicr::GicR> {
        self.gicr
            .get(crate::cpu::id())
            .and_then(|r| r.get())
            .ok_or(GicError::RedistributorNotFound)
    }

    fn lpi_table(&self) -> Result<&LpiTable> {
        self.lpis.get().ok_or(GicError::ItsUnavailable)
    }

    /// Zeroed memory that lives as long as the GIC.
    fn table(size: usize, align: usize) -> Result<usize> {
        let layout = Layout::from_size_align(size, align).map_err(|_| GicError::ItsUnavailable)?;
        let ptr = unsafe { alloc_zeroed(layout) };
        if ptr.is_null() {
            return Err(GicError::ItsUnavailable);
        }
        Ok(ptr as usize)
    }
}

impl Driver for GicV3 {
    fn compatible(&self) -> &'static str {
        "GICv3 (ARM Generic Interrupt Controller v3)"
    }

    fn device_type(&self) -> drivers::DeviceType {
        drivers::DeviceType::Intc
    }
}

impl GicOps for GicV3 {
    fn init_distributor(&self) {
        self.gicd.init(crate::arch::cpu::affinity());
    }

    fn init_redistributor(&self, core: usize) -> Result<()> {
        let slot = self.gicr.get(core).ok_or(GicError::RedistributorNotFound)?;
        let affinity = crate::arch::cpu::affinity();
        let frame = unsafe { gicr::GicR::find(self.gicr_base, affinity) }
            .ok_or(GicError::RedistributorNotFound)?;
        frame.init();
        debug!(
            "core {}: redistributor at {:#x} for affinity {:#x}",
            core,
            frame.base(),
            affinity
        );
        slot.call_once(|| frame);
        Ok(())
    }

    fn init_cpu_interface(&self) {
        // enable system register interface
        let sre = read_sre();
        if sre & SRE_ENABLE == 0 {
            write_sre(sre | SRE_ENABLE);
            crate::cpu::isb();
        }

        // set priority threshold to max.
        write_pmr(0xff);
        // EOIR both drops priority and deactivates.
        write_ctlr(read_ctlr() & !CTLR_EOIMODE);
        // enable group 1 interrupts.
        write_igrpen1(1);

        crate::cpu::isb();
    }

    fn setup_lpis(&self) -> Result<()> {
        let needed = (LPI_START as usize + self.lpi_count).next_power_of_two();
        let id_bits = (needed.trailing_zeros()).min(self.gicd.id_bits());
        if (1usize << id_bits) <= LPI_START as usize {
            return Err(GicError::ItsUnavailable);
        }
        let len = (1usize << id_bits) - LPI_START as usize;
        let prop = Self::table(len, 0x1000)?;
        for i in 0..len {
            unsafe { ((prop + i) as *mut u8).write_volatile(LPI_DEFAULT_PRIORITY) };
        }

        let mut addr = self.gicr_base;
        loop {
            let frame = unsafe { gicr::GicR::new(addr) };
            let pend = Self::table((1usize << id_bits) / 8, 0x10000)?;
            frame.enable_lpis(prop, id_bits, pend)?;
            if frame.is_last() {
                break;
            }
            addr += gicr::FRAME_STRIDE;
        }

        self.lpis.call_once(|| LpiTable { base: prop, len });
        info!("{} LPIs from {}", len, LPI_START);
        Ok(())
    }

    fn enable(&self, id: IrqId) -> Result<()> {
        match id {
            0..=31 => self.local()?.enable(id),
            SPI_START..=SPI_END => self.gicd.enable(id),
            _ if id >= LPI_START => self.lpi_table()?.update(id, |e| e | LPI_ENABLE),
            _ => Err(GicError::InvalidId(id)),
        }
    }

    fn disable(&self, id: IrqId) -> Result<()> {
        match id {
            0..=31 => self.local()?.disable(id),
            SPI_START..=SPI_END => self.gicd.disable(id),
            _ if id >= LPI_START => self.lpi_table()?.update(id, |e| e & !LPI_ENABLE),
            _ => Err(GicError::InvalidId(id)),
        }
    }

    fn set_priority(&self, id: IrqId, raw: u8) -> Result<()> {
        match id {
            0..=31 => self.local()?.set_priority(id, raw),
            SPI_START..=SPI_END => self.gicd.set_priority(id, raw),
            _ if id >= LPI_START => self
                .lpi_table()?
                .update(id, |e| (e & !LPI_PRIORITY_MASK) | (raw & LPI_PRIORITY_MASK)),
            _ => Err(GicError::InvalidId(id)),
        }
    }

    fn priority(&self, id: IrqId) -> Result<u8> {
        match id {
            0..=31 => self.local()?.priority(id),
            SPI_START..=SPI_END => self.gicd.priority(id),
            _ if id >= LPI_START => {
                let entry = self.lpi_table()?.entry(id)?;
                Ok(unsafe { entry.read_volatile() } & LPI_PRIORITY_MASK)
            }
            _ => Err(GicError::InvalidId(id)),
        }
    }

    fn set_trigger(&self, id: IrqId, mode: TriggerMode) -> Result<()> {
        match id {
            0..=31 => self.local()?.set_trigger(id, mode),
            SPI_START..=SPI_END => self.gicd.set_trigger(id, mode),
            _ => Err(GicError::InvalidId(id)),
        }
    }

    fn trigger(&self, id: IrqId) -> Result<TriggerMode> {
        match id {
            0..=31 => self.local()?.trigger(id),
            SPI_START..=SPI_END => self.gicd.trigger(id),
            // message based
            _ if id >= LPI_START => Ok(TriggerMode::Edge),
            _ => Err(GicError::InvalidId(id)),
        }
    }

    fn set_spi_routing(&self, id: IrqId, routing: SpiRouting) -> Result<()> {
        self.gicd.set_routing(id, routing)
    }

    fn spi_routing(&self, id: IrqId) -> Result<SpiRouting> {
        self.gicd.routing(id)
    }

    fn set_spi_message(&self, id: IrqId, pending: bool) -> Result<()> {
        self.gicd.set_spi_message(id, pending)
    }

    fn generate_sgi(&self, id: IrqId, target: SgiTarget) -> Result<()> {
        if id > SGI_MAX {
            return Err(GicError::InvalidId(id));
        }
        let intid = (id as u64) << 24;
        let value = match target {
            SgiTarget::AllOthers => intid | 1 << 40,
            SgiTarget::Cluster {
                aff3,
                aff2,
                aff1,
                target_list,
            } => {
                (aff3 as u64) << 48
                    | (aff2 as u64) << 32
                    | intid
                    | (aff1 as u64) << 16
                    | target_list as u64
            }
        };
        write_sgi1r(value);
        crate::cpu::isb();
        Ok(())
    }

    fn acknowledge(&self) -> IrqId {
        (read_iar1() & 0xff_ffff) as IrqId
    }

    fn deactivate(&self, id: IrqId) {
        write_eoir1(id as u64);
    }

    fn set_priority_filter(&self, raw: u8) {
        write_pmr(raw as u64);
    }

    fn priority_filter(&self) -> u8 {
        read_pmr() as u8
    }

    fn set_priority_group_bits(&self, bits: u8) {
        write_bpr1((bits & 0x7) as u64);
    }

    fn priority_group_bits(&self) -> u8 {
        (read_bpr1() & 0x7) as u8
    }

    fn running_priority(&self) -> u8 {
        read_rpr() as u8
    }
}
