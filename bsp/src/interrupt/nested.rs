//! Letting more urgent interrupts preempt a running handler.
//!
//! Taking an IRQ overwrites the exception return state, so before a handler
//! re-opens IRQs that state is parked in a slot of a fixed-capacity arena
//! and put back once the nested section ends. The slot is never on the
//! handler's stack, so it survives whatever the nested handlers do with it.

use core::fmt;
use vec_arena::Arena;

use super::IrqId;
use crate::sync::MutexNoIrq;

/// Exception return state of one handler invocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SavedContext {
    pub elr: u64,
    pub spsr: u64,
}

/// The CPU-mode operations nesting needs.
pub trait IrqMode: Send + Sync {
    fn save(&self) -> SavedContext;
    /// Let the core take IRQs again while still inside the handler.
    fn unmask(&self);
    fn mask(&self);
    fn restore(&self, ctx: &SavedContext);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestError {
    /// Every save slot is in use.
    DepthExceeded(usize),
}

impl fmt::Display for NestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NestError::DepthExceeded(depth) => write!(f, "interrupt nesting deeper than {}", depth),
        }
    }
}

struct SaveSlot {
    vector: IrqId,
    ctx: SavedContext,
}

pub struct NestedInterrupts<M> {
    mode: M,
    slots: MutexNoIrq<Arena<SaveSlot>>,
    capacity: usize,
}

impl<M: IrqMode> NestedInterrupts<M> {
    pub fn new(mode: M, capacity: usize) -> Self {
        NestedInterrupts {
            mode,
            slots: MutexNoIrq::new(Arena::with_capacity(capacity)),
            capacity,
        }
    }

    /// Number of open nested sections.
    pub fn depth(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether a nested section of `vector` is open.
    pub fn is_nested(&self, vector: IrqId) -> bool {
        self.slots.lock().iter().any(|(_, slot)| slot.vector == vector)
    }

    /// Run `work` from the handler of `vector` with IRQs open.
    ///
    /// The return state is saved before IRQs open and restored after they
    /// close again, on every way out of `work`.
    pub fn run_nested<R, F>(&self, vector: IrqId, work: F) -> Result<R, NestError>
    where
        F: FnOnce() -> R,
    {
        let ctx = self.mode.save();
        let key = {
            let mut slots = self.slots.lock();
            if slots.len() >= self.capacity {
                return Err(NestError::DepthExceeded(self.capacity));
            }
            slots.insert(SaveSlot { vector, ctx })
        };
        let section = NestedSection { owner: self, key };
        self.mode.unmask();
        let result = work();
        drop(section);
        Ok(result)
    }
}

struct NestedSection<'a, M: IrqMode> {
    owner: &'a NestedInterrupts<M>,
    key: usize,
}

impl<M: IrqMode> Drop for NestedSection<'_, M> {
    fn drop(&mut self) {
        self.owner.mode.mask();
        let slot = self.owner.slots.lock().remove(self.key);
        match slot {
            Some(slot) => self.owner.mode.restore(&slot.ctx),
            None => error!("nested interrupt slot {} lost", self.key),
        }
    }
}
