//! Software stand-ins for the hardware and RTOS the core is written against.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    ops::Deref,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Condvar, Mutex, Weak,
    },
    thread,
    time::Duration,
};

use soc_bsp::{
    drivers::{
        dma::{ChanHwConfig, ChanMode, ChanStatus, GdmaHwError},
        irq::{GicError, SgiTarget, SpiRouting, TriggerMode, SGI_MAX, SPI_START},
        DeviceType, Driver, GdmaHw, GicOps,
    },
    gdma::{
        bdl::BdlDesc,
        config::{GdmaCaps, GdmaConfig, Qos},
        ChanId, Gdma,
    },
    interrupt::{
        calibrate::StepTimer,
        nested::{IrqMode, SavedContext},
        ControllerConfig, CpuTopology, InitRole, InterruptController, IrqId, SPURIOUS_IRQ,
    },
    sync::{Locker, Rtos, Timeout},
};

/// E2000Q core affinities.
pub const AFFINITIES: [u64; 4] = [0x000, 0x100, 0x200, 0x201];

/// How the running-priority and filter registers present priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityView {
    Full,
    /// `0x80 | raw >> shift`; a shift of 1 is the non-secure view.
    Scaled(u8),
}

impl PriorityView {
    pub fn apply(self, raw: u8) -> u8 {
        match self {
            PriorityView::Full => raw,
            PriorityView::Scaled(shift) => 0x80 | (raw >> shift),
        }
    }
}

#[derive(Default)]
struct GicState {
    priorities: HashMap<IrqId, u8>,
    triggers: HashMap<IrqId, TriggerMode>,
    routing: HashMap<IrqId, SpiRouting>,
    enabled: HashSet<IrqId>,
    pending: Vec<IrqId>,
    /// Raw priorities of the active interrupts, innermost last.
    running: Vec<u8>,
    filter: u8,
    group_bits: u8,
    sgis: Vec<(IrqId, SgiTarget)>,
    calls: Vec<String>,
}

/// A GIC kept entirely in memory.
pub struct FakeGic {
    state: Mutex<GicState>,
    view: PriorityView,
    max_id: IrqId,
    pub fail_redistributor: AtomicBool,
}

impl FakeGic {
    pub fn new() -> Self {
        Self::with_view(PriorityView::Full)
    }

    pub fn with_view(view: PriorityView) -> Self {
        FakeGic {
            state: Mutex::new(GicState {
                filter: 0xff,
                ..GicState::default()
            }),
            view,
            max_id: 1019,
            fail_redistributor: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, GicState> {
        self.state.lock().unwrap()
    }

    fn check(&self, id: IrqId) -> Result<(), GicError> {
        if id > self.max_id && id < 8192 {
            Err(GicError::InvalidId(id))
        } else {
            Ok(())
        }
    }

    /// Mark `id` pending, as a device would.
    pub fn raise(&self, id: IrqId) {
        self.state().pending.push(id);
    }

    pub fn is_pending(&self, id: IrqId) -> bool {
        self.state().pending.contains(&id)
    }

    pub fn is_enabled(&self, id: IrqId) -> bool {
        self.state().enabled.contains(&id)
    }

    pub fn raw_priority(&self, id: IrqId) -> Option<u8> {
        self.state().priorities.get(&id).copied()
    }

    pub fn routing_of(&self, id: IrqId) -> Option<SpiRouting> {
        self.state().routing.get(&id).copied()
    }

    pub fn sgis(&self) -> Vec<(IrqId, SgiTarget)> {
        self.state().sgis.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn filter_raw(&self) -> u8 {
        self.state().filter
    }

    pub fn active_depth(&self) -> usize {
        self.state().running.len()
    }
}

impl Driver for FakeGic {
    fn compatible(&self) -> &'static str {
        "fake,gic"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Intc
    }
}

impl GicOps for FakeGic {
    fn init_distributor(&self) {
        self.state().calls.push("distributor".into());
    }

    fn init_redistributor(&self, core: usize) -> Result<(), GicError> {
        if self.fail_redistributor.load(Ordering::SeqCst) {
            return Err(GicError::RedistributorNotFound);
        }
        self.state().calls.push(format!("redistributor {}", core));
        Ok(())
    }

    fn init_cpu_interface(&self) {
        let mut state = self.state();
        state.filter = 0xff;
        state.calls.push("cpu interface".into());
    }

    fn enable(&self, id: IrqId) -> Result<(), GicError> {
        self.check(id)?;
        self.state().enabled.insert(id);
        Ok(())
    }

    fn disable(&self, id: IrqId) -> Result<(), GicError> {
        self.check(id)?;
        self.state().enabled.remove(&id);
        Ok(())
    }

    fn set_priority(&self, id: IrqId, raw: u8) -> Result<(), GicError> {
        self.check(id)?;
        self.state().priorities.insert(id, raw);
        Ok(())
    }

    fn priority(&self, id: IrqId) -> Result<u8, GicError> {
        self.check(id)?;
        Ok(self.state().priorities.get(&id).copied().unwrap_or(0))
    }

    fn set_trigger(&self, id: IrqId, mode: TriggerMode) -> Result<(), GicError> {
        self.check(id)?;
        self.state().triggers.insert(id, mode);
        Ok(())
    }

    fn trigger(&self, id: IrqId) -> Result<TriggerMode, GicError> {
        self.check(id)?;
        Ok(self
            .state()
            .triggers
            .get(&id)
            .copied()
            .unwrap_or(TriggerMode::Level))
    }

    fn set_spi_routing(&self, id: IrqId, routing: SpiRouting) -> Result<(), GicError> {
        if id < SPI_START || id > self.max_id {
            return Err(GicError::InvalidId(id));
        }
        self.state().routing.insert(id, routing);
        Ok(())
    }

    fn set_spi_message(&self, id: IrqId, pending: bool) -> Result<(), GicError> {
        if id < SPI_START || id > self.max_id {
            return Err(GicError::InvalidId(id));
        }
        let mut state = self.state();
        state.pending.retain(|&p| p != id);
        if pending {
            state.pending.push(id);
        }
        Ok(())
    }

    fn spi_routing(&self, id: IrqId) -> Result<SpiRouting, GicError> {
        if id < SPI_START || id > self.max_id {
            return Err(GicError::InvalidId(id));
        }
        Ok(self
            .state()
            .routing
            .get(&id)
            .copied()
            .unwrap_or(SpiRouting::Affinity(0)))
    }

    fn generate_sgi(&self, id: IrqId, target: SgiTarget) -> Result<(), GicError> {
        if id > SGI_MAX {
            return Err(GicError::InvalidId(id));
        }
        self.state().sgis.push((id, target));
        Ok(())
    }

    /// Most urgent enabled pending id that beats both the filter and the
    /// interrupt being handled.
    fn acknowledge(&self) -> IrqId {
        let mut state = self.state();
        let ceiling = state.running.last().copied();
        let mut best: Option<(usize, IrqId, u8)> = None;
        for (pos, &id) in state.pending.iter().enumerate() {
            if !state.enabled.contains(&id) {
                continue;
            }
            let prio = state.priorities.get(&id).copied().unwrap_or(0);
            if self.view.apply(prio) >= state.filter || ceiling.map_or(false, |c| prio >= c) {
                continue;
            }
            if best.map_or(true, |(_, _, p)| prio < p) {
                best = Some((pos, id, prio));
            }
        }
        match best {
            Some((pos, id, prio)) => {
                state.pending.remove(pos);
                state.running.push(prio);
                id
            }
            None => SPURIOUS_IRQ,
        }
    }

    fn deactivate(&self, _id: IrqId) {
        self.state().running.pop();
    }

    fn set_priority_filter(&self, raw: u8) {
        self.state().filter = raw;
    }

    fn priority_filter(&self) -> u8 {
        self.state().filter
    }

    fn set_priority_group_bits(&self, bits: u8) {
        self.state().group_bits = bits;
    }

    fn priority_group_bits(&self) -> u8 {
        self.state().group_bits
    }

    fn running_priority(&self) -> u8 {
        let raw = self.state().running.last().copied().unwrap_or(0xff);
        self.view.apply(raw)
    }
}

/// Step timer that fires its interrupt through the controller while
/// settling.
pub struct FakeTimer {
    irq: IrqId,
    /// How many times the interrupt may fire during one settle.
    fires: usize,
    running: AtomicBool,
    irq_enabled: AtomicBool,
    pub countdowns: Mutex<Vec<u32>>,
    controller: Mutex<Option<Weak<InterruptController<FakeGic>>>>,
}

impl FakeTimer {
    pub fn new(irq: IrqId, fires: usize) -> Self {
        FakeTimer {
            irq,
            fires,
            running: AtomicBool::new(false),
            irq_enabled: AtomicBool::new(false),
            countdowns: Mutex::new(Vec::new()),
            controller: Mutex::new(None),
        }
    }

    pub fn attach(&self, controller: &Arc<InterruptController<FakeGic>>) {
        *self.controller.lock().unwrap() = Some(Arc::downgrade(controller));
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Driver for FakeTimer {
    fn compatible(&self) -> &'static str {
        "fake,timer"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Timer
    }
}

impl StepTimer for FakeTimer {
    fn irq(&self) -> IrqId {
        self.irq
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn set_countdown(&self, ticks: u32) {
        self.countdowns.lock().unwrap().push(ticks);
    }

    fn enable_interrupt(&self) {
        self.irq_enabled.store(true, Ordering::SeqCst);
    }

    fn disable_interrupt(&self) {
        self.irq_enabled.store(false, Ordering::SeqCst);
    }

    fn settle(&self) {
        let controller = self
            .controller
            .lock()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade);
        let controller = match controller {
            Some(controller) => controller,
            None => return,
        };
        for _ in 0..self.fires {
            if !self.running.load(Ordering::SeqCst) || !self.irq_enabled.load(Ordering::SeqCst) {
                break;
            }
            controller.gic().raise(self.irq);
            controller.handle_pending();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    Acquired(usize),
    Released(usize),
    TimedOut(usize),
}

struct FakeLocker {
    id: usize,
    held: Mutex<bool>,
    freed: Condvar,
    log: Arc<Mutex<Vec<LockEvent>>>,
}

impl Locker for FakeLocker {
    fn acquire(&self, timeout: Timeout) -> bool {
        let held = self.held.lock().unwrap();
        let (mut held, result) = self
            .freed
            .wait_timeout_while(held, Duration::from_millis(timeout.millis()), |held| *held)
            .unwrap();
        if result.timed_out() && *held {
            self.log.lock().unwrap().push(LockEvent::TimedOut(self.id));
            return false;
        }
        *held = true;
        self.log.lock().unwrap().push(LockEvent::Acquired(self.id));
        true
    }

    fn release(&self) {
        let mut held = self.held.lock().unwrap();
        self.log.lock().unwrap().push(LockEvent::Released(self.id));
        *held = false;
        self.freed.notify_one();
    }
}

/// RTOS stand-in that records scheduler suspension and lock traffic.
#[derive(Default)]
pub struct FakeRtos {
    suspended: AtomicUsize,
    pub suspend_calls: AtomicUsize,
    pub deepest: AtomicUsize,
    lockers: AtomicUsize,
    pub no_lockers: AtomicBool,
    pub log: Arc<Mutex<Vec<LockEvent>>>,
}

impl FakeRtos {
    pub fn suspended(&self) -> usize {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn lock_log(&self) -> Vec<LockEvent> {
        self.log.lock().unwrap().clone()
    }
}

impl Rtos for FakeRtos {
    fn suspend_scheduler(&self) {
        self.suspend_calls.fetch_add(1, Ordering::SeqCst);
        let depth = self.suspended.fetch_add(1, Ordering::SeqCst) + 1;
        self.deepest.fetch_max(depth, Ordering::SeqCst);
    }

    fn resume_scheduler(&self) {
        self.suspended.fetch_sub(1, Ordering::SeqCst);
    }

    fn create_locker(&self) -> Option<Box<dyn Locker>> {
        if self.no_lockers.load(Ordering::SeqCst) {
            return None;
        }
        Some(Box::new(FakeLocker {
            id: self.lockers.fetch_add(1, Ordering::SeqCst),
            held: Mutex::new(false),
            freed: Condvar::new(),
            log: self.log.clone(),
        }))
    }
}

/// GDMA register layer that performs transfers in software when told the
/// hardware finished.
#[derive(Default)]
pub struct FakeGdmaHw {
    pub configure_calls: AtomicUsize,
    pub deconfigure_calls: AtomicUsize,
    pub start_calls: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub fail_configure: AtomicBool,
    pub fail_start: AtomicBool,
    pub fail_stop: AtomicBool,
    /// Time spent inside `allocate_chan`, to widen race windows.
    pub allocate_delay_ms: AtomicUsize,
    /// Time spent inside `stop`.
    pub stop_delay_ms: AtomicUsize,
    inside: AtomicUsize,
    pub max_inside: AtomicUsize,
    chans: Mutex<HashMap<ChanId, ChanHwConfig>>,
    running: Mutex<HashSet<ChanId>>,
    status: Mutex<HashMap<ChanId, ChanStatus>>,
}

impl FakeGdmaHw {
    pub fn is_allocated(&self, chan: ChanId) -> bool {
        self.chans.lock().unwrap().contains_key(&chan)
    }

    pub fn is_running(&self, chan: ChanId) -> bool {
        self.running.lock().unwrap().contains(&chan)
    }

    /// Whether some thread is inside `allocate_chan` right now.
    pub fn busy(&self) -> bool {
        self.inside.load(Ordering::SeqCst) > 0
    }

    pub fn chan_config(&self, chan: ChanId) -> Option<ChanHwConfig> {
        self.chans.lock().unwrap().get(&chan).copied()
    }

    /// Finish the transfer on `chan`: copy the data and latch the status.
    pub fn complete(&self, chan: ChanId) {
        assert!(
            self.running.lock().unwrap().remove(&chan),
            "channel {} was not started",
            chan
        );
        let config = self.chan_config(chan).expect("channel not allocated");
        let mut status = ChanStatus::TRANS_END;
        match config.mode {
            ChanMode::Bdl { list_addr, entries } => {
                for n in 0..entries as usize {
                    let desc = unsafe { (list_addr as *const BdlDesc).add(n).read_volatile() };
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            desc.src() as usize as *const u8,
                            desc.dst() as usize as *mut u8,
                            desc.total_bytes as usize,
                        )
                    };
                    if desc.interrupt_on_completion() {
                        status |= ChanStatus::BDL_END;
                    }
                }
            }
            ChanMode::Direct { src, dst, len } => unsafe {
                std::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, len as usize)
            },
        }
        *self.status.lock().unwrap().entry(chan).or_insert(ChanStatus::empty()) |= status;
    }

    /// Latch `status` on `chan` without moving data.
    pub fn signal(&self, chan: ChanId, status: ChanStatus) {
        *self.status.lock().unwrap().entry(chan).or_insert(ChanStatus::empty()) |= status;
    }
}

impl Driver for FakeGdmaHw {
    fn compatible(&self) -> &'static str {
        "fake,gdma"
    }

    fn device_type(&self) -> DeviceType {
        DeviceType::Dma
    }
}

impl GdmaHw for FakeGdmaHw {
    fn configure(&self, _config: &GdmaConfig) -> Result<(), GdmaHwError> {
        self.configure_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_configure.load(Ordering::SeqCst) {
            return Err(GdmaHwError::Timeout);
        }
        Ok(())
    }

    fn deconfigure(&self) {
        self.deconfigure_calls.fetch_add(1, Ordering::SeqCst);
        self.chans.lock().unwrap().clear();
        self.running.lock().unwrap().clear();
    }

    fn start(&self) -> Result<(), GdmaHwError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(GdmaHwError::Timeout);
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), GdmaHwError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.stop_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay as u64));
        }
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(GdmaHwError::Timeout);
        }
        Ok(())
    }

    fn allocate_chan(&self, chan: ChanId, config: &ChanHwConfig) -> Result<(), GdmaHwError> {
        let inside = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(inside, Ordering::SeqCst);
        let delay = self.allocate_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay as u64));
        }
        let result = {
            let mut chans = self.chans.lock().unwrap();
            if chans.contains_key(&chan) {
                Err(GdmaHwError::ChanInUse(chan))
            } else {
                chans.insert(chan, *config);
                Ok(())
            }
        };
        self.inside.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn deallocate_chan(&self, chan: ChanId) -> Result<(), GdmaHwError> {
        self.running.lock().unwrap().remove(&chan);
        match self.chans.lock().unwrap().remove(&chan) {
            Some(_) => Ok(()),
            None => Err(GdmaHwError::ChanNotAllocated(chan)),
        }
    }

    fn start_transfer(&self, chan: ChanId) -> Result<(), GdmaHwError> {
        if !self.is_allocated(chan) {
            return Err(GdmaHwError::ChanNotAllocated(chan));
        }
        self.running.lock().unwrap().insert(chan);
        Ok(())
    }

    fn stop_chan(&self, chan: ChanId) -> Result<(), GdmaHwError> {
        self.running.lock().unwrap().remove(&chan);
        Ok(())
    }

    fn pending_channels(&self) -> u32 {
        self.status
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, status)| !status.is_empty())
            .fold(0u32, |mask, (chan, _)| mask | 1u32 << *chan)
    }

    fn take_status(&self, chan: ChanId) -> ChanStatus {
        self.status
            .lock()
            .unwrap()
            .remove(&chan)
            .unwrap_or(ChanStatus::empty())
    }
}

/// CPU mode whose IRQ window runs whatever the test hooks into it. Clones
/// share state.
#[derive(Clone, Default)]
pub struct FakeMode(Arc<ModeState>);

#[derive(Default)]
pub struct ModeState {
    pub elr: Mutex<u64>,
    pub spsr: Mutex<u64>,
    masked: AtomicBool,
    on_unmask: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl Deref for FakeMode {
    type Target = ModeState;

    fn deref(&self) -> &ModeState {
        &self.0
    }
}

impl FakeMode {
    pub fn on_unmask(&self, hook: Arc<dyn Fn() + Send + Sync>) {
        *self.0.on_unmask.lock().unwrap() = Some(hook);
    }

    pub fn is_masked(&self) -> bool {
        self.0.masked.load(Ordering::SeqCst)
    }
}

impl IrqMode for FakeMode {
    fn save(&self) -> SavedContext {
        SavedContext {
            elr: *self.elr.lock().unwrap(),
            spsr: *self.spsr.lock().unwrap(),
        }
    }

    fn unmask(&self) {
        self.0.masked.store(false, Ordering::SeqCst);
        let hook = self.0.on_unmask.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn mask(&self) {
        self.0.masked.store(true, Ordering::SeqCst);
    }

    fn restore(&self, ctx: &SavedContext) {
        *self.elr.lock().unwrap() = ctx.elr;
        *self.spsr.lock().unwrap() = ctx.spsr;
    }
}

/// Controller over a fresh fake GIC, brought up as primary on core 0.
pub fn controller(gic: FakeGic) -> Arc<InterruptController<FakeGic>> {
    let config = ControllerConfig::new(CpuTopology::new(&AFFINITIES));
    let controller = Arc::new(InterruptController::new(Arc::new(gic), config));
    controller.init(0, InitRole::Primary);
    controller
}

pub const GDMA_IRQS: [IrqId; 4] = [100, 101, 102, 103];
pub const SHARED_IRQ: [IrqId; 1] = [120];

pub fn gdma_config(pool_size: usize) -> GdmaConfig {
    GdmaConfig {
        instance_id: 0,
        base_addr: 0x3000_0000,
        irqs: &GDMA_IRQS,
        irq_priority: 0,
        chan_count: GDMA_IRQS.len(),
        caps: GdmaCaps::BDL | GdmaCaps::DIRECT,
        rd_qos: Qos::Poll,
        wr_qos: Qos::Priority(3),
        pool_size,
    }
}

/// One GDMA instance slot wired to a fake GIC and RTOS.
pub struct Bench {
    pub irq: Arc<InterruptController<FakeGic>>,
    pub rtos: Arc<FakeRtos>,
    pub hw: Arc<FakeGdmaHw>,
    pub gdma: Gdma<FakeGic, FakeGdmaHw>,
}

impl Bench {
    pub fn new(config: GdmaConfig) -> Self {
        let irq = controller(FakeGic::new());
        let rtos = Arc::new(FakeRtos::default());
        let hw = Arc::new(FakeGdmaHw::default());
        let gdma = Gdma::new(irq.clone(), rtos.clone(), vec![(config, hw.clone())]);
        Bench { irq, rtos, hw, gdma }
    }

    /// Deliver the pending interrupts, as the IRQ vector would.
    pub fn deliver(&self, irq: IrqId) {
        self.irq.gic().raise(irq);
        self.irq.handle_pending();
    }
}

/// Buffer aligned for DMA.
#[repr(C, align(16))]
pub struct DmaBuf(pub [u8; 1024]);

impl DmaBuf {
    pub fn filled(seed: u8) -> Box<Self> {
        let mut buf = Box::new(DmaBuf([0; 1024]));
        for (i, b) in buf.0.iter_mut().enumerate() {
            *b = seed.wrapping_add(i as u8);
        }
        buf
    }

    pub fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }
}
