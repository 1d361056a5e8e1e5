use alloc::{sync::Arc, vec::Vec};
use core::{
    convert::TryFrom,
    fmt,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{
    affinity::CpuTopology,
    calibrate::{
        translate_get, translate_set, ProbeHandler, StepProbe, StepTimer, PROBE_FIRST_COUNTDOWN,
        PROBE_PRIORITY,
    },
    vector::{IrqHandler, VectorLayout, VectorTable},
    IrqError, IrqId, Result, CPU_MASK_ALL, DEFAULT_PRIORITY_GROUP_BITS, MAX_PRIORITY,
    PRIORITY_SHIFT,
};
use crate::drivers::irq::{GicOps, SgiTarget, SpiRouting, TriggerMode};

/// What `init` brings up on the calling core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitRole {
    /// Distributor, redistributor, CPU interface and calibration.
    Primary,
    /// Redistributor and CPU interface only.
    Secondary,
    /// Someone else owns the GIC; touch nothing.
    None,
}

/// Bring-up progress of one core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum CoreState {
    Uninitialized = 0,
    DistributorReady = 1,
    CpuInterfaceReady = 2,
    StepCalibrated = 3,
    Operational = 4,
}

impl fmt::Display for CoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Delivery target of a shared peripheral interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuTarget {
    Any,
    Cpu(usize),
}

pub struct ControllerConfig {
    pub layout: VectorLayout,
    pub topology: CpuTopology,
    pub priority_group_bits: u8,
    /// Timer for the priority-step probe. Without one the shifted view is
    /// never detected.
    pub step_timer: Option<Arc<dyn StepTimer>>,
    /// Bring up LPIs during primary init.
    pub enable_lpis: bool,
}

impl ControllerConfig {
    pub fn new(topology: CpuTopology) -> Self {
        ControllerConfig {
            layout: VectorLayout::default(),
            topology,
            priority_group_bits: DEFAULT_PRIORITY_GROUP_BITS,
            step_timer: None,
            enable_lpis: cfg!(feature = "gic_its"),
        }
    }

    pub fn with_step_timer(mut self, timer: Arc<dyn StepTimer>) -> Self {
        self.step_timer = Some(timer);
        self
    }

    pub fn with_layout(mut self, layout: VectorLayout) -> Self {
        self.layout = layout;
        self
    }
}

/// Front-end of the interrupt controller shared by every core.
///
/// Priorities at this level are logical, `0..=MAX_PRIORITY`.
pub struct InterruptController<G> {
    pub(super) gic: Arc<G>,
    pub(super) vectors: VectorTable,
    config: ControllerConfig,
    needs_translate: AtomicBool,
    cores: Vec<AtomicU8>,
}

#[inline]
fn raw_priority(logical: u8) -> Result<u8> {
    if logical > MAX_PRIORITY {
        return Err(IrqError::InvalidPriority(logical));
    }
    Ok(logical << PRIORITY_SHIFT)
}

impl<G: GicOps + 'static> InterruptController<G> {
    pub fn new(gic: Arc<G>, config: ControllerConfig) -> Self {
        let cores = (0..config.topology.len())
            .map(|_| AtomicU8::new(CoreState::Uninitialized.into()))
            .collect();
        InterruptController {
            vectors: VectorTable::new(config.layout),
            gic,
            config,
            needs_translate: AtomicBool::new(false),
            cores,
        }
    }

    #[inline]
    pub fn gic(&self) -> &Arc<G> {
        &self.gic
    }

    #[inline]
    pub fn vectors(&self) -> &VectorTable {
        &self.vectors
    }

    #[inline]
    pub fn topology(&self) -> &CpuTopology {
        &self.config.topology
    }

    pub fn core_state(&self, core: usize) -> CoreState {
        self.cores
            .get(core)
            .and_then(|s| CoreState::try_from(s.load(Ordering::Acquire)).ok())
            .unwrap_or(CoreState::Uninitialized)
    }

    fn set_core_state(&self, core: usize, state: CoreState) {
        trace!("core {}: interrupt controller {}", core, state);
        self.cores[core].store(state.into(), Ordering::Release);
    }

    /// Bring up the controller for logical core `core`, once per core.
    pub fn init(&self, core: usize, role: InitRole) {
        assert!(
            core < self.cores.len(),
            "core {} outside the cpu topology",
            core
        );
        if role == InitRole::None {
            self.set_core_state(core, CoreState::Operational);
            return;
        }
        assert_eq!(
            self.core_state(core),
            CoreState::Uninitialized,
            "interrupt controller already initialised on core {}",
            core
        );

        if role == InitRole::Primary {
            self.vectors.clear();
            self.gic.init_distributor();
            self.set_core_state(core, CoreState::DistributorReady);
        }

        if let Err(e) = self.gic.init_redistributor(core) {
            panic!("core {}: redistributor bring-up failed: {}", core, e);
        }
        if role == InitRole::Primary && self.config.enable_lpis {
            if let Err(e) = self.gic.setup_lpis() {
                panic!("LPI bring-up failed: {}", e);
            }
        }
        self.gic.init_cpu_interface();
        self.set_core_state(core, CoreState::CpuInterfaceReady);
        self.gic
            .set_priority_group_bits(self.config.priority_group_bits);

        if role == InitRole::Primary {
            self.calibrate_step();
            self.set_core_state(core, CoreState::StepCalibrated);
        }
        self.set_core_state(core, CoreState::Operational);
        info!(
            "{}: core {} up as {:?}",
            self.gic.compatible(),
            core,
            role
        );
    }

    /// Measure the running-priority step and latch `needs_translate`.
    fn calibrate_step(&self) {
        let timer = match &self.config.step_timer {
            Some(timer) => timer.clone(),
            None => {
                warn!("no step timer, priority translation disabled");
                self.needs_translate.store(false, Ordering::Release);
                return;
            }
        };
        let irq = timer.irq();
        let probe = Arc::new(StepProbe::new());

        timer.stop();
        if let Err(e) = self.set_priority(irq, PROBE_PRIORITY) {
            warn!("priority probe on irq {}: {}", irq, e);
            return;
        }
        let handler = ProbeHandler {
            gic: self.gic.clone(),
            timer: timer.clone(),
            probe: probe.clone(),
        };
        self.vectors
            .install(irq, Some(Arc::new(handler)), "priority step probe");
        if let Err(e) = self.unmask(irq) {
            warn!("priority probe on irq {}: {}", irq, e);
        }

        timer.set_countdown(PROBE_FIRST_COUNTDOWN);
        timer.enable_interrupt();
        timer.start();
        timer.settle();

        timer.stop();
        timer.disable_interrupt();
        if let Err(e) = self.mask(irq) {
            warn!("priority probe on irq {} left unmasked: {}", irq, e);
        }
        self.vectors.remove(irq);

        let needs_translate = match probe.step() {
            Some(step) => super::calibrate::classify_step(step),
            None => {
                warn!("priority probe did not fire twice, assuming no translation");
                false
            }
        };
        self.needs_translate
            .store(needs_translate, Ordering::Release);
        debug!("priority translation: {}", needs_translate);
    }

    #[inline]
    pub fn needs_translate(&self) -> bool {
        self.needs_translate.load(Ordering::Acquire)
    }

    /// Install `handler` for `id`; see [`VectorTable::install`].
    pub fn install(&self, id: IrqId, handler: Option<Arc<dyn IrqHandler>>, name: &'static str) {
        self.vectors.install(id, handler, name)
    }

    pub fn install_handler<H>(&self, id: IrqId, handler: H, name: &'static str)
    where
        H: IrqHandler + 'static,
    {
        self.vectors.install(id, Some(Arc::new(handler)), name)
    }

    pub fn uninstall(&self, id: IrqId) -> bool {
        self.vectors.remove(id)
    }

    /// Stop delivery of `id`. The handler stays installed.
    pub fn mask(&self, id: IrqId) -> Result<()> {
        Ok(self.gic.disable(id)?)
    }

    pub fn unmask(&self, id: IrqId) -> Result<()> {
        Ok(self.gic.enable(id)?)
    }

    pub fn set_priority(&self, id: IrqId, priority: u8) -> Result<()> {
        let raw = raw_priority(priority)?;
        Ok(self.gic.set_priority(id, raw)?)
    }

    pub fn priority(&self, id: IrqId) -> Result<u8> {
        Ok(self.gic.priority(id)? >> PRIORITY_SHIFT)
    }

    /// Only interrupts more urgent than `priority` are signalled.
    pub fn set_priority_mask(&self, priority: u8) -> Result<()> {
        let mut raw = raw_priority(priority)?;
        if self.needs_translate() {
            raw = translate_set(raw);
        }
        self.gic.set_priority_filter(raw);
        Ok(())
    }

    pub fn priority_mask(&self) -> u8 {
        self.logical_view(self.gic.priority_filter())
    }

    /// Priority of the interrupt being handled on the calling core.
    pub fn current_priority(&self) -> u8 {
        self.logical_view(self.gic.running_priority())
    }

    fn logical_view(&self, raw: u8) -> u8 {
        let raw = if self.needs_translate() {
            translate_get(raw)
        } else {
            raw
        };
        raw >> PRIORITY_SHIFT
    }

    pub fn set_priority_group_bits(&self, bits: u8) {
        self.gic.set_priority_group_bits(bits & 0x7)
    }

    pub fn priority_group_bits(&self) -> u8 {
        self.gic.priority_group_bits()
    }

    pub fn set_trigger_mode(&self, id: IrqId, mode: TriggerMode) -> Result<()> {
        Ok(self.gic.set_trigger(id, mode)?)
    }

    pub fn trigger_mode(&self, id: IrqId) -> Result<TriggerMode> {
        Ok(self.gic.trigger(id)?)
    }

    pub fn set_target_cpus(&self, id: IrqId, target: CpuTarget) -> Result<()> {
        let routing = match target {
            CpuTarget::Any => SpiRouting::Any,
            CpuTarget::Cpu(cpu) => SpiRouting::Affinity(
                self.config
                    .topology
                    .affinity(cpu)
                    .ok_or(IrqError::CpuNotPresent(cpu))?,
            ),
        };
        Ok(self.gic.set_spi_routing(id, routing)?)
    }

    pub fn target_cpus(&self, id: IrqId) -> Result<CpuTarget> {
        match self.gic.spi_routing(id)? {
            SpiRouting::Any => Ok(CpuTarget::Any),
            SpiRouting::Affinity(aff) => self
                .config
                .topology
                .cpu_of(aff)
                .map(CpuTarget::Cpu)
                .ok_or(IrqError::UnknownAffinity(aff)),
        }
    }

    /// Message-based SPI: make `id` pending (`send`) or withdraw it.
    pub fn set_spi_message(&self, id: IrqId, send: bool) -> Result<()> {
        Ok(self.gic.set_spi_message(id, send)?)
    }

    /// Raise SGI `id` on every core in `cpu_mask` (bit n = logical core n).
    /// [`CPU_MASK_ALL`] reaches every other core.
    pub fn send_core_interrupt(&self, id: IrqId, cpu_mask: u64) -> Result<()> {
        if cpu_mask == CPU_MASK_ALL {
            return Ok(self.gic.generate_sgi(id, SgiTarget::AllOthers)?);
        }
        for target in self.config.topology.sgi_targets(cpu_mask)? {
            self.gic.generate_sgi(id, target)?;
        }
        Ok(())
    }
}
