//! Bare-metal bring-up of the interrupt core and the GDMA controllers.

use alloc::{sync::Arc, vec::Vec};
use spin::Once;

use super::{CPU_AFFINITY, CPU_NUM, GDMA_CONFIGS, GICD_BASE, GICR_BASE, LPI_COUNT};
use crate::{
    arch::{
        interrupt::{handler, El1IrqMode},
        timer::GenericTimer,
    },
    drivers::{dma::gdma::GdmaMmio, irq::gicv3::GicV3},
    gdma::Gdma,
    interrupt::{
        dispatch::set_irq_dispatcher, ControllerConfig, CpuTopology, InitRole,
        InterruptController, NestedInterrupts,
    },
    sync::BareMetal,
};

pub type Controller = InterruptController<GicV3>;
pub type BoardGdma = Gdma<GicV3, GdmaMmio>;

/// Save slots for nested handlers.
const NEST_DEPTH: usize = 8;

static IRQ: Once<Arc<Controller>> = Once::new();
static GDMA: Once<BoardGdma> = Once::new();
static NESTED: Once<NestedInterrupts<El1IrqMode>> = Once::new();

/// Boot core: logging, vectors, interrupt controller with calibration and
/// the GDMA slots. IRQs stay masked on return.
pub fn init_primary() -> &'static Arc<Controller> {
    crate::logging::init();
    handler::init();

    let irq = IRQ.call_once(|| {
        let gic = unsafe { GicV3::new(GICD_BASE, GICR_BASE, CPU_NUM, LPI_COUNT) };
        let config = ControllerConfig::new(CpuTopology::new(&CPU_AFFINITY))
            .with_step_timer(Arc::new(GenericTimer::new()));
        Arc::new(InterruptController::new(Arc::new(gic), config))
    });
    set_irq_dispatcher(&**irq);
    irq.init(crate::cpu::id(), InitRole::Primary);

    NESTED.call_once(|| NestedInterrupts::new(El1IrqMode, NEST_DEPTH));
    GDMA.call_once(|| {
        let slots = GDMA_CONFIGS
            .iter()
            .map(|config| {
                let hw = unsafe { GdmaMmio::new(config.base_addr, config.chan_count) };
                (*config, Arc::new(hw))
            })
            .collect::<Vec<_>>();
        Gdma::new(irq.clone(), Arc::new(BareMetal::new()), slots)
    });

    kprintln!("Hello {}! from CPU {}", super::BOARD_NAME, crate::cpu::id());
    irq
}

/// Any other core, after [`init_primary`] finished.
pub fn init_secondary() {
    handler::init();
    match IRQ.get() {
        Some(irq) => irq.init(crate::cpu::id(), InitRole::Secondary),
        None => panic!("secondary core {} up before the boot core", crate::cpu::id()),
    }
}

pub fn controller() -> Option<&'static Arc<Controller>> {
    IRQ.get()
}

pub fn gdma() -> Option<&'static BoardGdma> {
    GDMA.get()
}

/// Nesting support for handlers that want to run with IRQs open.
pub fn nested() -> Option<&'static NestedInterrupts<El1IrqMode>> {
    NESTED.get()
}
