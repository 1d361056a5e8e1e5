//! General-purpose DMA: controller instances and their channels.
//!
//! [`Gdma`] owns the board's instance slots. [`Gdma::init`] brings an
//! instance up and hands out a shared [`GdmaInstance`]; the channel
//! operations in [`channel`] run on that instance.
//!
//! Control operations (setup, revoke, start, stop) are serialised by a
//! per-instance [`Locked`] with a bounded wait. The transfers themselves run
//! without it: completion is reported by the instance interrupt, which only
//! touches atomics and IRQ-safe spin locks.

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use allocators::{MemPool, PoolError};
use core::{
    convert::TryFrom,
    fmt,
    sync::atomic::{AtomicBool, AtomicU8, Ordering},
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use spin::Mutex;

use crate::{
    drivers::{
        dma::{ChanStatus, GdmaHwError},
        irq::GicOps,
        GdmaHw,
    },
    interrupt::{CpuTarget, InterruptController, IrqError, IrqHandler, IrqId},
    sync::{LockTimeout, Locked, MutexNoIrq, NoPreemptGuard, Rtos, Timeout},
};

use self::{
    bdl::{BdlError, BdlList, BDL_ALIGN},
    config::{GdmaConfig, GDMA_IRQ_PRIORITY},
};

pub mod bdl;
pub mod channel;
pub mod config;

pub use self::channel::{ChanEventHandler, GdmaRequest};

pub type ChanId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GdmaError {
    /// The instance is not (or no longer) initialised.
    NotInit,
    /// Static configuration unusable: no channels, or missing vectors.
    InvalidConfig,
    InvalidRequest,
    /// Out of descriptor memory.
    AllocateFail,
    ChannelBusy,
    ChannelNotConfigured,
    InvalidBdlEntry,
    BdlFull,
    LockTimeout,
    /// The RTOS could not provide a locker.
    LockerUnavailable,
    PoolInit(PoolError),
    Hw(GdmaHwError),
    Irq(IrqError),
}

impl fmt::Display for GdmaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GdmaError::NotInit => f.write_str("gdma instance not initialised"),
            GdmaError::InvalidConfig => f.write_str("invalid gdma configuration"),
            GdmaError::InvalidRequest => f.write_str("invalid transfer request"),
            GdmaError::AllocateFail => f.write_str("out of descriptor memory"),
            GdmaError::ChannelBusy => f.write_str("channel busy"),
            GdmaError::ChannelNotConfigured => f.write_str("channel not configured"),
            GdmaError::InvalidBdlEntry => f.write_str("invalid descriptor entry"),
            GdmaError::BdlFull => f.write_str("descriptor list full"),
            GdmaError::LockTimeout => f.write_str("instance lock timed out"),
            GdmaError::LockerUnavailable => f.write_str("no locker available"),
            GdmaError::PoolInit(e) => write!(f, "descriptor pool: {}", e),
            GdmaError::Hw(e) => write!(f, "{}", e),
            GdmaError::Irq(e) => write!(f, "interrupt setup: {}", e),
        }
    }
}

impl From<GdmaHwError> for GdmaError {
    fn from(e: GdmaHwError) -> Self {
        GdmaError::Hw(e)
    }
}

impl From<IrqError> for GdmaError {
    fn from(e: IrqError) -> Self {
        GdmaError::Irq(e)
    }
}

impl From<PoolError> for GdmaError {
    fn from(e: PoolError) -> Self {
        GdmaError::PoolInit(e)
    }
}

impl From<LockTimeout> for GdmaError {
    fn from(_: LockTimeout) -> Self {
        GdmaError::LockTimeout
    }
}

impl From<BdlError> for GdmaError {
    fn from(e: BdlError) -> Self {
        match e {
            BdlError::Full => GdmaError::BdlFull,
            BdlError::EmptyTransfer | BdlError::Misaligned(_) => GdmaError::InvalidBdlEntry,
        }
    }
}

pub type Result<T> = core::result::Result<T, GdmaError>;

/// Life cycle of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ChanState {
    Unconfigured = 0,
    /// Descriptors written (or direct transfer programmed), ready to start.
    Configured = 1,
    /// Start command being issued.
    Armed = 2,
    Transferring = 3,
    /// Setup failed part-way. Only a revoke brings the channel back.
    Indeterminate = 4,
}

/// Channel events that can carry a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum ChanEvent {
    BdlEnd = 0,
    TransEnd = 1,
    Busy = 2,
}

const CHAN_EVENT_NUM: usize = 3;

type EventHandlers = [Option<Arc<dyn ChanEventHandler>>; CHAN_EVENT_NUM];

/// Per-channel state the interrupt handler reads.
struct ChanShared {
    state: AtomicU8,
    handlers: MutexNoIrq<EventHandlers>,
}

impl ChanShared {
    fn new() -> Self {
        ChanShared {
            state: AtomicU8::new(ChanState::Unconfigured.into()),
            handlers: MutexNoIrq::new([None, None, None]),
        }
    }

    fn state(&self) -> ChanState {
        ChanState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(ChanState::Indeterminate)
    }

    fn set_state(&self, state: ChanState) {
        self.state.store(state.into(), Ordering::Release);
    }

    /// Move to `to` only from one of `from`.
    fn transition(&self, from: &[ChanState], to: ChanState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                let cur = ChanState::try_from(cur).ok()?;
                if from.contains(&cur) {
                    Some(to.into())
                } else {
                    None
                }
            })
            .is_ok()
    }

    fn handler(&self, event: ChanEvent) -> Option<Arc<dyn ChanEventHandler>> {
        self.handlers.lock()[event as usize].clone()
    }
}

/// Control-plane ownership of one channel, guarded by the instance lock.
#[derive(Default)]
struct ChanControl {
    bdl: Option<BdlList>,
    /// The register layer has the channel allocated.
    allocated: bool,
}

#[repr(C, align(128))]
struct PoolBlock([u8; BDL_ALIGN]);

struct Inner {
    pool: MemPool,
    /// Memory behind `pool`. Never resized, so the region stays put.
    _backing: Box<[PoolBlock]>,
    chans: Vec<ChanControl>,
}

/// One initialised GDMA controller.
pub struct GdmaInstance<H> {
    config: GdmaConfig,
    hw: Arc<H>,
    ready: AtomicBool,
    inner: Locked<Inner>,
    chans: Vec<ChanShared>,
}

impl<H: GdmaHw> GdmaInstance<H> {
    fn new(config: GdmaConfig, hw: Arc<H>, rtos: &dyn Rtos) -> Result<Self> {
        let blocks = (config.pool_size + BDL_ALIGN - 1) / BDL_ALIGN;
        let mut backing: Box<[PoolBlock]> = (0..blocks).map(|_| PoolBlock([0; BDL_ALIGN])).collect();
        let start = backing.as_mut_ptr() as usize;
        let mut pool = MemPool::new();
        pool.init(start, start + blocks * BDL_ALIGN)?;

        let locker = match rtos.create_locker() {
            Some(locker) => locker,
            None => {
                pool.deinit();
                return Err(GdmaError::LockerUnavailable);
            }
        };
        let inner = Inner {
            pool,
            _backing: backing,
            chans: (0..config.chan_count).map(|_| ChanControl::default()).collect(),
        };
        Ok(GdmaInstance {
            chans: (0..config.chan_count).map(|_| ChanShared::new()).collect(),
            config,
            hw,
            ready: AtomicBool::new(false),
            inner: Locked::new(locker, inner),
        })
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.config.instance_id
    }

    #[inline]
    pub fn config(&self) -> &GdmaConfig {
        &self.config
    }

    #[inline]
    pub fn hw(&self) -> &Arc<H> {
        &self.hw
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Vectors this instance owns with the channel each serves (`None` for
    /// a vector shared by all channels).
    fn vectors(&self) -> impl Iterator<Item = (IrqId, Option<ChanId>)> + '_ {
        let shared = self.config.shared_irq();
        self.config
            .irqs
            .iter()
            .take(self.config.chan_count)
            .enumerate()
            .map(move |(chan, &irq)| (irq, if shared { None } else { Some(chan) }))
    }

    /// Drop every channel's descriptor memory and release the pool.
    fn release_pool(&self, inner: &mut Inner) {
        for ctl in inner.chans.iter_mut() {
            ctl.bdl = None;
            ctl.allocated = false;
        }
        inner.pool.deinit();
        for chan in self.chans.iter() {
            chan.set_state(ChanState::Unconfigured);
            *chan.handlers.lock() = [None, None, None];
        }
    }

    /// Interrupt entry. `source` is the channel of a per-channel vector,
    /// `None` for the shared vector.
    pub fn handle_irq(&self, source: Option<ChanId>) {
        match source {
            Some(chan) => self.service(chan),
            None => {
                let mut pending = self.hw.pending_channels();
                while pending != 0 {
                    let chan = pending.trailing_zeros() as ChanId;
                    pending &= pending - 1;
                    if chan < self.chans.len() {
                        self.service(chan);
                    }
                }
            }
        }
    }

    fn service(&self, chan: ChanId) {
        let status = self.hw.take_status(chan);
        let shared = &self.chans[chan];
        if status.contains(ChanStatus::BUSY) {
            self.fire(shared, chan, ChanEvent::Busy);
        }
        if status.contains(ChanStatus::BDL_END) {
            self.fire(shared, chan, ChanEvent::BdlEnd);
        }
        if status.contains(ChanStatus::TRANS_END) {
            shared.transition(
                &[ChanState::Armed, ChanState::Transferring],
                ChanState::Configured,
            );
            self.fire(shared, chan, ChanEvent::TransEnd);
        }
    }

    #[inline]
    fn fire(&self, shared: &ChanShared, chan: ChanId, event: ChanEvent) {
        if let Some(handler) = shared.handler(event) {
            handler.handle(chan);
        }
    }
}

/// Vector table entry for one GDMA vector.
struct GdmaIrq<H> {
    instance: Arc<GdmaInstance<H>>,
    chan: Option<ChanId>,
}

impl<H: GdmaHw> IrqHandler for GdmaIrq<H> {
    fn handle(&self, _id: IrqId) {
        self.instance.handle_irq(self.chan);
    }
}

struct Slot<H> {
    config: GdmaConfig,
    hw: Arc<H>,
    instance: Mutex<Option<Arc<GdmaInstance<H>>>>,
}

/// The board's GDMA controllers.
pub struct Gdma<G, H> {
    irq: Arc<InterruptController<G>>,
    rtos: Arc<dyn Rtos>,
    slots: Vec<Slot<H>>,
}

impl<G, H> Gdma<G, H>
where
    G: GicOps + 'static,
    H: GdmaHw + 'static,
{
    /// One slot per `(config, register layer)` pair, indexed by position.
    pub fn new(
        irq: Arc<InterruptController<G>>,
        rtos: Arc<dyn Rtos>,
        slots: Vec<(GdmaConfig, Arc<H>)>,
    ) -> Self {
        let slots = slots
            .into_iter()
            .enumerate()
            .map(|(id, (mut config, hw))| {
                config.instance_id = id;
                Slot {
                    config,
                    hw,
                    instance: Mutex::new(None),
                }
            })
            .collect();
        Gdma { irq, rtos, slots }
    }

    #[inline]
    pub fn instance_count(&self) -> usize {
        self.slots.len()
    }

    /// The running instance in slot `id`, if any.
    pub fn instance(&self, id: usize) -> Option<Arc<GdmaInstance<H>>> {
        self.slots.get(id)?.instance.lock().clone()
    }

    /// Bring up instance `id`. A second call returns the running instance.
    ///
    /// On failure everything acquired so far is released and the slot stays
    /// empty.
    pub fn init(&self, id: usize) -> Result<Arc<GdmaInstance<H>>> {
        assert!(id < self.slots.len(), "gdma instance {} does not exist", id);
        let slot = &self.slots[id];

        let _no_preempt = NoPreemptGuard::new(&*self.rtos);
        let mut current = slot.instance.lock();
        if let Some(instance) = current.as_ref() {
            warn!("gdma{} already initialised", id);
            return Ok(instance.clone());
        }

        let mut config = slot.config;
        config.irq_priority = GDMA_IRQ_PRIORITY;
        let instance = self.bring_up(config, &slot.hw).map_err(|e| {
            error!("gdma{} init failed: {}", id, e);
            e
        })?;
        *current = Some(instance.clone());
        info!(
            "gdma{} ready: {} channels, {} bytes of descriptor memory",
            id, config.chan_count, config.pool_size
        );
        Ok(instance)
    }

    fn bring_up(&self, config: GdmaConfig, hw: &Arc<H>) -> Result<Arc<GdmaInstance<H>>> {
        let vectors_needed = if config.shared_irq() { 1 } else { config.chan_count };
        if config.chan_count == 0 || config.irqs.len() < vectors_needed {
            return Err(GdmaError::InvalidConfig);
        }

        hw.configure(&config)?;
        let instance = match GdmaInstance::new(config, hw.clone(), &*self.rtos) {
            Ok(instance) => Arc::new(instance),
            Err(e) => {
                hw.deconfigure();
                return Err(e);
            }
        };

        let started = self
            .attach_vectors(&instance)
            .and_then(|_| Ok(instance.hw.start()?));
        if let Err(e) = started {
            self.detach_vectors(&instance);
            if let Err(e) = instance.hw.stop() {
                warn!("gdma{}: stop during rollback: {}", config.instance_id, e);
            }
            // not published yet, so nothing else can hold the lock
            match instance.inner.try_lock() {
                Ok(mut inner) => instance.release_pool(&mut inner),
                Err(e) => warn!("gdma{}: pool left during rollback: {}", config.instance_id, e),
            }
            instance.hw.deconfigure();
            return Err(e);
        }
        instance.ready.store(true, Ordering::Release);
        Ok(instance)
    }

    /// Route every vector of `instance` to the calling core and install the
    /// completion handler.
    fn attach_vectors(&self, instance: &Arc<GdmaInstance<H>>) -> Result<()> {
        let core = crate::cpu::id();
        for (irq, chan) in instance.vectors() {
            self.irq.set_target_cpus(irq, CpuTarget::Cpu(core))?;
            self.irq.set_priority(irq, instance.config.irq_priority)?;
            self.irq.install_handler(
                irq,
                GdmaIrq {
                    instance: instance.clone(),
                    chan,
                },
                "gdma",
            );
            self.irq.unmask(irq)?;
        }
        Ok(())
    }

    fn detach_vectors(&self, instance: &GdmaInstance<H>) {
        for (irq, _) in instance.vectors() {
            if let Err(e) = self.irq.mask(irq) {
                warn!("gdma{}: mask irq {}: {}", instance.id(), irq, e);
            }
            self.irq.uninstall(irq);
        }
    }

    /// Tear `instance` down.
    ///
    /// Waits up to [`Timeout::DEFAULT`] for a control operation in progress
    /// to finish. If the instance lock cannot be taken nothing is torn down
    /// and `LockTimeout` is returned. Past that point every step runs even
    /// when an earlier one fails; the first error is returned. Channel
    /// transfers still in flight are cut off.
    pub fn deinit(&self, instance: &Arc<GdmaInstance<H>>) -> Result<()> {
        let id = instance.id();
        assert!(id < self.slots.len(), "gdma instance {} does not exist", id);
        let slot = &self.slots[id];

        // held until `ready` is cleared, so waiters see the instance gone
        let mut inner = instance.inner.lock(Timeout::DEFAULT).map_err(|e| {
            error!("gdma{} deinit: {}", id, e);
            GdmaError::from(e)
        })?;
        let _no_preempt = NoPreemptGuard::new(&*self.rtos);
        let mut current = slot.instance.lock();
        if !instance.is_ready() {
            return Err(GdmaError::NotInit);
        }

        let mut first = None;
        let mut note = |step: &str, e: GdmaError| {
            error!("gdma{} deinit: {}: {}", id, step, e);
            first.get_or_insert(e);
        };
        if let Err(e) = instance.hw.stop() {
            note("stop", e.into());
        }
        self.detach_vectors(instance);
        instance.release_pool(&mut inner);
        instance.hw.deconfigure();
        instance.ready.store(false, Ordering::Release);
        *current = None;
        info!("gdma{} down", id);

        first.map_or(Ok(()), Err)
    }
}
