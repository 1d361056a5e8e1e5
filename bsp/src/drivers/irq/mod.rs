use core::fmt;
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::Driver;
use crate::interrupt::IrqId;

#[cfg(target_os = "none")]
pub mod gicv3;

/// Largest SGI id.
pub const SGI_MAX: IrqId = 15;
/// First SPI id. Routing only applies from here on.
pub const SPI_START: IrqId = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GicError {
    /// The controller does not implement this id, or the operation does not
    /// apply to its class (SGI/PPI/SPI).
    InvalidId(IrqId),
    /// No redistributor frame matches the core's affinity.
    RedistributorNotFound,
    /// LPIs requested but the controller has no ITS.
    ItsUnavailable,
}

impl fmt::Display for GicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GicError::InvalidId(id) => write!(f, "interrupt {} not supported here", id),
            GicError::RedistributorNotFound => f.write_str("no redistributor for this core"),
            GicError::ItsUnavailable => f.write_str("ITS not available"),
        }
    }
}

pub type Result<T> = core::result::Result<T, GicError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum TriggerMode {
    Level = 0,
    Edge = 1,
}

/// Where the distributor delivers an SPI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpiRouting {
    /// Any participating core.
    Any,
    /// The core with this MPIDR affinity.
    Affinity(u64),
}

/// Destination of one software-generated interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SgiTarget {
    /// Every core except the sender.
    AllOthers,
    /// Cores `aff3.aff2.aff1.n` for every bit `n` set in `target_list`.
    Cluster {
        aff3: u8,
        aff2: u8,
        aff1: u8,
        target_list: u16,
    },
}

/// Everything the interrupt core needs from a GIC.
///
/// Priorities here are raw 8-bit register values. Interpretation (logical
/// levels, non-secure views) belongs to the caller.
pub trait GicOps: Driver {
    /// Distributor bring-up, boot core only.
    fn init_distributor(&self);

    /// Wake the redistributor of logical core `core`.
    fn init_redistributor(&self, core: usize) -> Result<()>;

    fn init_cpu_interface(&self);

    /// LPI tables and ITS. Controllers without LPIs keep the default.
    fn setup_lpis(&self) -> Result<()> {
        Err(GicError::ItsUnavailable)
    }

    fn enable(&self, id: IrqId) -> Result<()>;
    fn disable(&self, id: IrqId) -> Result<()>;

    fn set_priority(&self, id: IrqId, raw: u8) -> Result<()>;
    fn priority(&self, id: IrqId) -> Result<u8>;

    fn set_trigger(&self, id: IrqId, mode: TriggerMode) -> Result<()>;
    fn trigger(&self, id: IrqId) -> Result<TriggerMode>;

    /// Only SPIs can be routed; anything below [`SPI_START`] is rejected.
    fn set_spi_routing(&self, id: IrqId, routing: SpiRouting) -> Result<()>;
    fn spi_routing(&self, id: IrqId) -> Result<SpiRouting>;

    /// Set or clear the pending state of an SPI the way a device message
    /// write would.
    fn set_spi_message(&self, id: IrqId, pending: bool) -> Result<()>;

    /// Only ids up to [`SGI_MAX`] are accepted.
    fn generate_sgi(&self, id: IrqId, target: SgiTarget) -> Result<()>;

    /// Highest-priority pending id, or the spurious id.
    fn acknowledge(&self) -> IrqId;
    /// End of interrupt: priority drop and deactivation.
    fn deactivate(&self, id: IrqId);

    fn set_priority_filter(&self, raw: u8);
    fn priority_filter(&self) -> u8;

    fn set_priority_group_bits(&self, bits: u8);
    fn priority_group_bits(&self) -> u8;

    /// Priority of the interrupt the calling core is handling.
    fn running_priority(&self) -> u8;
}
