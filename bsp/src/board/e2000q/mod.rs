//! Phytium E2000Q development board.

use log::LevelFilter;

use crate::{
    gdma::config::{GdmaCaps, GdmaConfig, Qos, GDMA_IRQ_PRIORITY},
    interrupt::IrqId,
};

#[cfg(target_os = "none")]
pub mod bringup;

pub const BOARD_NAME: &str = "E2000Q";
pub const CPU_NUM: usize = 4;

/// MPIDR affinity of each logical core. Core 0 boots.
pub const CPU_AFFINITY: [u64; CPU_NUM] = [0x000, 0x100, 0x200, 0x201];

/// Console UART (PL011).
pub const UART_BASE: usize = 0x2800_d000;

/// Console log level unless `LOG` is set at build time.
pub const LOG_LEVEL: LevelFilter = LevelFilter::Info;

pub const GIC_BASE: usize = 0x3080_0000;
pub const GICD_BASE: usize = GIC_BASE;
/// First redistributor frame.
pub const GICR_BASE: usize = GIC_BASE + 0x8_0000;

/// Entries of the LPI vector table.
pub const LPI_COUNT: usize = 1024;

const GDMA0_CHANNELS: usize = 16;
const GDMA0_CHAN0_IRQ: IrqId = 266;

const fn gdma0_irqs() -> [IrqId; GDMA0_CHANNELS] {
    let mut irqs = [0; GDMA0_CHANNELS];
    let mut chan = 0;
    while chan < GDMA0_CHANNELS {
        irqs[chan] = GDMA0_CHAN0_IRQ + chan as IrqId;
        chan += 1;
    }
    irqs
}

static GDMA0_IRQS: [IrqId; GDMA0_CHANNELS] = gdma0_irqs();

/// GDMA controllers, indexed by instance id.
pub static GDMA_CONFIGS: [GdmaConfig; 1] = [GdmaConfig {
    instance_id: 0,
    base_addr: 0x32b3_4000,
    irqs: &GDMA0_IRQS,
    irq_priority: GDMA_IRQ_PRIORITY,
    chan_count: GDMA0_CHANNELS,
    caps: GdmaCaps::BDL,
    rd_qos: Qos::Poll,
    wr_qos: Qos::Poll,
    pool_size: 16 * 1024,
}];
