//! Device drivers and the capability traits the core code is written against.

#[cfg(target_os = "none")]
mod common;
pub mod dma;
pub mod irq;

use core::fmt::{self, Display};

pub use dma::GdmaHw;
pub use irq::GicOps;

#[derive(Debug, Eq, PartialEq)]
pub enum DeviceType {
    /// Interrupt controller
    Intc,
    Dma,
    Timer,
}

impl DeviceType {
    #[inline]
    fn description(&self) -> &'static str {
        match self {
            DeviceType::Intc => "Interrupt Controller",
            DeviceType::Dma => "DMA Controller",
            DeviceType::Timer => "Timer",
        }
    }
}

impl Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

pub trait Driver: Send + Sync {
    /// Return a compatibility string for identifying the driver.
    fn compatible(&self) -> &'static str;

    /// return the correspondent device type
    fn device_type(&self) -> DeviceType;
}
