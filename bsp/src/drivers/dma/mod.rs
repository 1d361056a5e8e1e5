use bitflags::bitflags;
use core::fmt;

use super::Driver;
use crate::gdma::{config::GdmaConfig, ChanId};

#[cfg(target_os = "none")]
pub mod gdma;

bitflags! {
    /// Per-channel event status, read-and-clear.
    pub struct ChanStatus: u32 {
        /// The channel went busy after a start command.
        const BUSY = 1 << 0;
        /// One descriptor with its IOC bit set finished.
        const BDL_END = 1 << 1;
        /// The whole transfer finished.
        const TRANS_END = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GdmaHwError {
    /// Soft reset or stop did not complete in time.
    Timeout,
    /// The channel is already allocated.
    ChanInUse(ChanId),
    /// The channel was never allocated.
    ChanNotAllocated(ChanId),
    /// The controller does not support the requested mode.
    Unsupported,
}

impl fmt::Display for GdmaHwError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GdmaHwError::Timeout => f.write_str("gdma register wait timed out"),
            GdmaHwError::ChanInUse(chan) => write!(f, "gdma channel {} already allocated", chan),
            GdmaHwError::ChanNotAllocated(chan) => write!(f, "gdma channel {} not allocated", chan),
            GdmaHwError::Unsupported => f.write_str("gdma mode not supported"),
        }
    }
}

pub type Result<T> = core::result::Result<T, GdmaHwError>;

/// How a channel moves data once started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanMode {
    /// Walk `entries` descriptors starting at the bus address `list_addr`.
    Bdl { list_addr: usize, entries: u32 },
    /// One contiguous copy programmed straight into the channel registers.
    Direct { src: usize, dst: usize, len: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChanHwConfig {
    pub mode: ChanMode,
    /// Events that raise the channel interrupt.
    pub irq_events: ChanStatus,
}

impl ChanHwConfig {
    /// Descriptor-list channel reporting every event.
    pub const fn bdl(list_addr: usize, entries: u32) -> Self {
        ChanHwConfig {
            mode: ChanMode::Bdl { list_addr, entries },
            irq_events: ChanStatus::all(),
        }
    }

    pub const fn direct(src: usize, dst: usize, len: u32) -> Self {
        ChanHwConfig {
            mode: ChanMode::Direct { src, dst, len },
            irq_events: ChanStatus::all(),
        }
    }
}

/// Register-level operations of one GDMA controller.
///
/// Implementations serialise nothing; callers hold the instance lock for
/// everything except the status reads done from the interrupt handler.
pub trait GdmaHw: Driver {
    /// Reset the controller and apply the static configuration. The engine
    /// is left stopped.
    fn configure(&self, config: &GdmaConfig) -> Result<()>;
    fn deconfigure(&self);

    /// Global enable.
    fn start(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;

    /// Claim `chan` and program its mode. The descriptor list may still be
    /// filled in afterwards, as long as it is complete before
    /// [`GdmaHw::start_transfer`].
    fn allocate_chan(&self, chan: ChanId, config: &ChanHwConfig) -> Result<()>;
    fn deallocate_chan(&self, chan: ChanId) -> Result<()>;

    fn start_transfer(&self, chan: ChanId) -> Result<()>;
    /// Abort whatever the channel is doing.
    fn stop_chan(&self, chan: ChanId) -> Result<()>;

    /// Bit `n` set when channel `n` has status pending.
    fn pending_channels(&self) -> u32;
    /// Read and clear the status of `chan`.
    fn take_status(&self, chan: ChanId) -> ChanStatus;
}
