use alloc::{sync::Arc, vec::Vec};

use super::{IrqId, LPI_START, MAX_HANDLERS, SPURIOUS_IRQ};
use crate::sync::MutexNoIrq;

/// Code run for one interrupt id.
///
/// Anything the handler needs travels with it: a closure's captures or the
/// fields of a handler type.
pub trait IrqHandler: Send + Sync {
    fn handle(&self, id: IrqId);
}

impl<F> IrqHandler for F
where
    F: Fn(IrqId) + Send + Sync,
{
    #[inline]
    fn handle(&self, id: IrqId) {
        self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorLayout {
    /// Ids `0..max_handlers` go to the ordinary table.
    pub max_handlers: usize,
    pub spurious_id: IrqId,
    /// Ids `lpi_start..lpi_start + lpi_count` go to the LPI table.
    pub lpi_start: IrqId,
    pub lpi_count: usize,
}

impl VectorLayout {
    pub const fn new(lpi_count: usize) -> Self {
        VectorLayout {
            max_handlers: MAX_HANDLERS,
            spurious_id: SPURIOUS_IRQ,
            lpi_start: LPI_START,
            lpi_count,
        }
    }
}

impl Default for VectorLayout {
    fn default() -> Self {
        VectorLayout::new(crate::board::LPI_COUNT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// The spurious id, nothing was done.
    Spurious,
    /// No handler for the id.
    Unregistered,
}

#[derive(Clone)]
struct InterruptRecord {
    handler: Arc<dyn IrqHandler>,
    name: &'static str,
}

type Records = MutexNoIrq<Vec<Option<InterruptRecord>>>;

/// Id to handler mapping for ordinary interrupts and LPIs.
///
/// Handlers run without any table lock held, so they may install, remove
/// or dispatch other ids.
pub struct VectorTable {
    layout: VectorLayout,
    vectors: Records,
    lpis: Records,
}

fn empty_records(len: usize) -> Records {
    let mut records = Vec::with_capacity(len);
    records.resize_with(len, || None);
    MutexNoIrq::new(records)
}

impl VectorTable {
    pub fn new(layout: VectorLayout) -> Self {
        VectorTable {
            layout,
            vectors: empty_records(layout.max_handlers),
            lpis: empty_records(layout.lpi_count),
        }
    }

    #[inline]
    pub fn layout(&self) -> &VectorLayout {
        &self.layout
    }

    fn locate(&self, id: IrqId) -> Option<(&Records, usize)> {
        let index = id as usize;
        if index < self.layout.max_handlers {
            return Some((&self.vectors, index));
        }
        let lpi = id.checked_sub(self.layout.lpi_start)? as usize;
        if lpi < self.layout.lpi_count {
            Some((&self.lpis, lpi))
        } else {
            None
        }
    }

    /// Bind `handler` to `id`. A `None` handler leaves the table untouched.
    /// Installing over an existing record replaces it.
    pub fn install(&self, id: IrqId, handler: Option<Arc<dyn IrqHandler>>, name: &'static str) {
        let handler = match handler {
            Some(handler) => handler,
            None => return,
        };
        let (records, index) = match self.locate(id) {
            Some(slot) => slot,
            None => {
                warn!("irq {} ({}) outside the vector table, ignored", id, name);
                return;
            }
        };
        let mut records = records.lock();
        if cfg!(debug_assertions) {
            if let Some(old) = &records[index] {
                warn!("irq {}: handler '{}' replaced by '{}'", id, old.name, name);
            }
        }
        records[index] = Some(InterruptRecord { handler, name });
    }

    /// Drop the record of `id`. Returns whether there was one.
    pub fn remove(&self, id: IrqId) -> bool {
        match self.locate(id) {
            Some((records, index)) => records.lock()[index].take().is_some(),
            None => false,
        }
    }

    pub fn is_installed(&self, id: IrqId) -> bool {
        self.name(id).is_some()
    }

    pub fn name(&self, id: IrqId) -> Option<&'static str> {
        let (records, index) = self.locate(id)?;
        let records = records.lock();
        records[index].as_ref().map(|r| r.name)
    }

    /// Forget every record.
    pub fn clear(&self) {
        for records in [&self.vectors, &self.lpis].iter() {
            records.lock().iter_mut().for_each(|r| *r = None);
        }
    }

    /// Run the handler of `id`.
    pub fn dispatch(&self, id: IrqId) -> Dispatch {
        if id == self.layout.spurious_id {
            return Dispatch::Spurious;
        }
        let record = self
            .locate(id)
            .and_then(|(records, index)| records.lock()[index].clone());
        match record {
            Some(record) => {
                record.handler.handle(id);
                Dispatch::Handled
            }
            None => {
                warn!("interrupt {} not registered", id);
                Dispatch::Unregistered
            }
        }
    }
}
