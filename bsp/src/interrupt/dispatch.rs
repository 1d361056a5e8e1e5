//! Exception entry: IRQ delivery to the vector table, and reporting of
//! synchronous exceptions and SErrors.

use core::{convert::TryFrom, fmt};
use num_enum::TryFromPrimitive;
use spin::{Once, RwLock};

use super::{controller::InterruptController, vector::Dispatch, IrqId};
use crate::drivers::irq::GicOps;

impl<G: GicOps + 'static> InterruptController<G> {
    /// Run the handler registered for `id`.
    #[inline]
    pub fn dispatch(&self, id: IrqId) -> Dispatch {
        self.vectors.dispatch(id)
    }

    /// Id of the most urgent pending interrupt, now active. The spurious id
    /// when nothing is pending.
    #[inline]
    pub fn acknowledge(&self) -> IrqId {
        self.gic.acknowledge()
    }

    /// End of interrupt for `id`.
    #[inline]
    pub fn deactivate(&self, id: IrqId) {
        self.gic.deactivate(id)
    }

    /// Acknowledge the highest-priority pending interrupt, run its handler
    /// and signal end of interrupt.
    pub fn handle_pending(&self) -> Dispatch {
        let id = self.acknowledge();
        if id == self.vectors.layout().spurious_id {
            return Dispatch::Spurious;
        }
        let outcome = self.vectors.dispatch(id);
        self.deactivate(id);
        outcome
    }
}

/// What the IRQ exception vector calls.
pub trait IrqDispatch: Send + Sync {
    fn handle_irq(&self);
}

impl<G: GicOps + 'static> IrqDispatch for InterruptController<G> {
    fn handle_irq(&self) {
        self.handle_pending();
    }
}

static IRQ_DISPATCHER: Once<&'static dyn IrqDispatch> = Once::new();

/// Route IRQ exceptions to `dispatcher`. Only the first call takes effect.
pub fn set_irq_dispatcher(dispatcher: &'static dyn IrqDispatch) {
    IRQ_DISPATCHER.call_once(|| dispatcher);
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum Kind {
    Synchronous = 0,
    Irq = 1,
    Fiq = 2,
    SError = 3,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum Source {
    CurrentSpEl0 = 0,
    CurrentSpElx = 1,
    LowerAArch64 = 2,
    LowerAArch32 = 3,
}

#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub struct Info {
    pub source: Source,
    pub kind: Kind,
}

/// Register state pushed by the exception vectors.
#[repr(C)]
#[derive(Debug, Default, Clone)]
pub struct TrapFrame {
    pub x: [u64; 31],
    pub elr: u64,
    pub spsr: u64,
    /// `kind << 16 | source`
    pub trap_num: u64,
}

impl TrapFrame {
    pub fn info(&self) -> Option<Info> {
        Some(Info {
            source: Source::try_from((self.trap_num & 0xffff) as u8).ok()?,
            kind: Kind::try_from((self.trap_num >> 16) as u8).ok()?,
        })
    }
}

/// ESR_ELx.EC
#[derive(Debug, PartialEq, Eq, Copy, Clone, TryFromPrimitive)]
#[repr(u8)]
pub enum ExceptionClass {
    Unknown = 0x00,
    WfiWfe = 0x01,
    SimdFp = 0x07,
    IllegalState = 0x0e,
    Svc64 = 0x15,
    Hvc64 = 0x16,
    Smc64 = 0x17,
    SysReg = 0x18,
    InstrAbortLower = 0x20,
    InstrAbortSame = 0x21,
    PcAlignment = 0x22,
    DataAbortLower = 0x24,
    DataAbortSame = 0x25,
    SpAlignment = 0x26,
    FpException = 0x2c,
    SError = 0x2f,
    BreakpointLower = 0x30,
    BreakpointSame = 0x31,
    SoftStepLower = 0x32,
    SoftStepSame = 0x33,
    WatchpointLower = 0x34,
    WatchpointSame = 0x35,
    Brk64 = 0x3c,
}

impl ExceptionClass {
    #[inline]
    pub fn from_esr(esr: u64) -> Option<Self> {
        Self::try_from(((esr >> 26) & 0x3f) as u8).ok()
    }

    pub fn description(&self) -> &'static str {
        match self {
            ExceptionClass::Unknown => "unknown reason",
            ExceptionClass::WfiWfe => "trapped WFI/WFE",
            ExceptionClass::SimdFp => "trapped SIMD/FP access",
            ExceptionClass::IllegalState => "illegal execution state",
            ExceptionClass::Svc64 => "SVC",
            ExceptionClass::Hvc64 => "HVC",
            ExceptionClass::Smc64 => "SMC",
            ExceptionClass::SysReg => "trapped system register access",
            ExceptionClass::InstrAbortLower => "instruction abort from lower EL",
            ExceptionClass::InstrAbortSame => "instruction abort",
            ExceptionClass::PcAlignment => "PC alignment fault",
            ExceptionClass::DataAbortLower => "data abort from lower EL",
            ExceptionClass::DataAbortSame => "data abort",
            ExceptionClass::SpAlignment => "SP alignment fault",
            ExceptionClass::FpException => "floating point exception",
            ExceptionClass::SError => "SError",
            ExceptionClass::BreakpointLower => "breakpoint from lower EL",
            ExceptionClass::BreakpointSame => "breakpoint",
            ExceptionClass::SoftStepLower => "software step from lower EL",
            ExceptionClass::SoftStepSame => "software step",
            ExceptionClass::WatchpointLower => "watchpoint from lower EL",
            ExceptionClass::WatchpointSame => "watchpoint",
            ExceptionClass::Brk64 => "BRK",
        }
    }

    /// Whether FAR holds the faulting address.
    pub fn has_fault_address(&self) -> bool {
        matches!(
            self,
            ExceptionClass::InstrAbortLower
                | ExceptionClass::InstrAbortSame
                | ExceptionClass::PcAlignment
                | ExceptionClass::DataAbortLower
                | ExceptionClass::DataAbortSame
                | ExceptionClass::WatchpointLower
                | ExceptionClass::WatchpointSame
        )
    }
}

/// A fatal exception, as handed to the end handler.
pub struct ExceptionReport<'a> {
    pub info: Info,
    pub class: Option<ExceptionClass>,
    pub esr: u64,
    pub far: u64,
    pub frame: &'a TrapFrame,
}

impl fmt::Display for ExceptionReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:?} exception from {:?}", self.info.kind, self.info.source)?;
        match self.class {
            Some(class) => writeln!(f, "ESR: {:#010x} ({})", self.esr, class.description())?,
            None => writeln!(f, "ESR: {:#010x} (unrecognised class)", self.esr)?,
        }
        if self.class.map_or(false, |c| c.has_fault_address()) {
            writeln!(f, "FAR: {:#018x}", self.far)?;
        }
        writeln!(f, "ELR: {:#018x} SPSR: {:#010x}", self.frame.elr, self.frame.spsr)?;
        for (i, pair) in self.frame.x.chunks(2).enumerate() {
            match pair {
                [a, b] => writeln!(f, "x{:<2}: {:#018x}  x{:<2}: {:#018x}", 2 * i, a, 2 * i + 1, b)?,
                [a] => writeln!(f, "x{:<2}: {:#018x}", 2 * i, a)?,
                _ => {}
            }
        }
        Ok(())
    }
}

/// Called after a synchronous exception or SError has been reported.
pub type EndHandler = fn(&ExceptionReport);

fn halt(_report: &ExceptionReport) {
    crate::cpu::wait_forever();
}

static SYNC_END_HANDLER: RwLock<EndHandler> = RwLock::new(halt);
static SERROR_END_HANDLER: RwLock<EndHandler> = RwLock::new(halt);

pub fn set_sync_end_handler(handler: EndHandler) {
    *SYNC_END_HANDLER.write() = handler;
}

pub fn set_serror_end_handler(handler: EndHandler) {
    *SERROR_END_HANDLER.write() = handler;
}

/// Common exception path behind the vectors.
pub fn handle_trap(tf: &mut TrapFrame, esr: u64, far: u64) {
    let info = match tf.info() {
        Some(info) => info,
        None => {
            error!("bad trap number {:#x}", tf.trap_num);
            return;
        }
    };
    trace!(
        "Exception @ CPU{}: {:?}, ESR: {:#x}, ELR: {:#x}",
        crate::cpu::id(),
        info,
        esr,
        tf.elr
    );
    match info.kind {
        Kind::Irq => match IRQ_DISPATCHER.get() {
            Some(dispatcher) => dispatcher.handle_irq(),
            None => warn!("IRQ before the dispatcher was set"),
        },
        Kind::Fiq => warn!("unexpected FIQ"),
        Kind::Synchronous | Kind::SError => {
            let report = ExceptionReport {
                info,
                class: ExceptionClass::from_esr(esr),
                esr,
                far,
                frame: tf,
            };
            error!("{}", report);
            let end = if info.kind == Kind::Synchronous {
                *SYNC_END_HANDLER.read()
            } else {
                *SERROR_END_HANDLER.read()
            };
            end(&report);
        }
    }
}
