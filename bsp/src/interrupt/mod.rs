//! Interrupt subsystem: vector table, controller front-end, exception
//! dispatch and nested-interrupt support.

use core::fmt;

use crate::drivers::irq::GicError;

pub mod affinity;
pub mod calibrate;
pub mod controller;
pub mod dispatch;
pub mod nested;
pub mod vector;

pub use self::affinity::CpuTopology;
pub use self::controller::{
    ControllerConfig, CoreState, CpuTarget, InitRole, InterruptController,
};
pub use self::dispatch::IrqDispatch;
pub use self::nested::NestedInterrupts;
pub use self::vector::{Dispatch, IrqHandler, VectorLayout, VectorTable};

pub type IrqId = u32;

/// Size of the ordinary vector table.
pub const MAX_HANDLERS: usize = 1024;
/// Returned by the acknowledge register when nothing is pending.
pub const SPURIOUS_IRQ: IrqId = 1023;
/// First LPI id.
pub const LPI_START: IrqId = 8192;

/// Logical priorities are `0..=MAX_PRIORITY`, lower is more urgent.
pub const MAX_PRIORITY: u8 = 15;
/// Logical priority `p` is written to the GIC as `p << PRIORITY_SHIFT`.
pub const PRIORITY_SHIFT: u8 = 4;
/// Binary point of 3: `gggg.ssss`, all four implemented bits preempt.
pub const DEFAULT_PRIORITY_GROUP_BITS: u8 = 3;

/// Every core in the system, for [`InterruptController::send_core_interrupt`].
pub const CPU_MASK_ALL: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    /// The controller rejected the interrupt id.
    InvalidId(IrqId),
    /// The cpu is not part of the board topology.
    CpuNotPresent(usize),
    /// Routed to an affinity no logical core has.
    UnknownAffinity(u64),
    /// Logical priority above [`MAX_PRIORITY`].
    InvalidPriority(u8),
    Gic(GicError),
}

impl fmt::Display for IrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrqError::InvalidId(id) => write!(f, "interrupt id {} does not fit", id),
            IrqError::CpuNotPresent(cpu) => write!(f, "cpu {} not present", cpu),
            IrqError::UnknownAffinity(aff) => write!(f, "no cpu with affinity {:#x}", aff),
            IrqError::InvalidPriority(p) => write!(f, "priority {} out of range", p),
            IrqError::Gic(e) => write!(f, "gic: {}", e),
        }
    }
}

impl From<GicError> for IrqError {
    fn from(e: GicError) -> Self {
        match e {
            GicError::InvalidId(id) => IrqError::InvalidId(id),
            other => IrqError::Gic(other),
        }
    }
}

pub type Result<T> = core::result::Result<T, IrqError>;
