//! Channel control: descriptor-list setup and teardown, start and stop.
//!
//! All of it runs under the instance lock. A started transfer does not hold
//! the lock; the caller learns about completion through the `TransEnd`
//! handler, called from interrupt context.

use alloc::sync::Arc;
use core::convert::TryFrom;

use super::{
    bdl::{BdlList, Transaction, BDL_ALIGN, BDL_DESC_SIZE},
    config::GdmaCaps,
    ChanEvent, ChanId, ChanState, GdmaError, GdmaInstance, Inner, Result,
};
use crate::{
    drivers::{dma::ChanHwConfig, GdmaHw},
    sync::{LockedGuard, Timeout},
};

/// Code run when a channel event fires. Called from interrupt context, so
/// it must not block.
pub trait ChanEventHandler: Send + Sync {
    fn handle(&self, chan: ChanId);
}

impl<F> ChanEventHandler for F
where
    F: Fn(ChanId) + Send + Sync,
{
    #[inline]
    fn handle(&self, chan: ChanId) {
        self(chan)
    }
}

/// A chain of copies for one channel.
#[derive(Clone, Default)]
pub struct GdmaRequest<'a> {
    /// One descriptor each, executed in order.
    pub transactions: &'a [Transaction],
    /// Called once the whole chain finished.
    pub done_handler: Option<Arc<dyn ChanEventHandler>>,
}

impl<H: GdmaHw> GdmaInstance<H> {
    #[inline]
    fn check_chan(&self, chan: ChanId) {
        assert!(
            chan < self.chans.len(),
            "gdma{} has no channel {}",
            self.id(),
            chan
        );
    }

    fn control(&self, timeout: Timeout) -> Result<LockedGuard<'_, Inner>> {
        if !self.is_ready() {
            return Err(GdmaError::NotInit);
        }
        let inner = self.inner.lock(timeout)?;
        // deinit may have finished while we waited
        if !self.is_ready() {
            return Err(GdmaError::NotInit);
        }
        Ok(inner)
    }

    pub fn channel_state(&self, chan: ChanId) -> ChanState {
        self.check_chan(chan);
        self.chans[chan].state()
    }

    /// Install (or with `None`, remove) the handler for `event` on `chan`.
    pub fn register_event_handler(
        &self,
        chan: ChanId,
        event: ChanEvent,
        handler: Option<Arc<dyn ChanEventHandler>>,
    ) -> Result<()> {
        self.check_chan(chan);
        if !self.is_ready() {
            return Err(GdmaError::NotInit);
        }
        let mut handlers = self.chans[chan].handlers.lock();
        if cfg!(debug_assertions) && handler.is_some() && handlers[event as usize].is_some() {
            warn!("gdma{} chan {}: replacing {:?} handler", self.id(), chan, event);
        }
        handlers[event as usize] = handler;
        Ok(())
    }

    /// Free descriptor-list memory, in bytes.
    pub fn pool_free_bytes(&self, timeout: Timeout) -> Result<usize> {
        Ok(self.control(timeout)?.pool.free_bytes())
    }

    /// Build the descriptor list for `request` and bind `chan` to it.
    ///
    /// The channel must be unconfigured. When an entry cannot be written the
    /// channel keeps its list and is left [`ChanState::Indeterminate`]:
    /// call [`GdmaInstance::revoke_channel`] before using it again.
    pub fn setup_channel(&self, chan: ChanId, request: &GdmaRequest, timeout: Timeout) -> Result<()> {
        self.check_chan(chan);
        let mut inner = self.control(timeout)?;
        let shared = &self.chans[chan];
        if shared.state() != ChanState::Unconfigured {
            return Err(GdmaError::ChannelBusy);
        }
        if !self.config.caps.contains(GdmaCaps::BDL) || request.transactions.is_empty() {
            return Err(GdmaError::InvalidRequest);
        }
        let entries =
            u32::try_from(request.transactions.len()).map_err(|_| GdmaError::InvalidRequest)?;

        let Inner { pool, chans, .. } = &mut *inner;
        let base = pool
            .alloc_aligned(BDL_DESC_SIZE * request.transactions.len(), BDL_ALIGN)
            .ok_or(GdmaError::AllocateFail)?;
        let mut bdl = unsafe { BdlList::new(base, entries) };

        if let Err(e) = self
            .hw
            .allocate_chan(chan, &ChanHwConfig::bdl(bdl.addr(), entries))
        {
            if let Err(e) = pool.free(base) {
                error!("gdma{} chan {}: {}", self.id(), chan, e);
            }
            return Err(e.into());
        }
        chans[chan].allocated = true;
        shared.handlers.lock()[ChanEvent::TransEnd as usize] = request.done_handler.clone();

        let appended = request
            .transactions
            .iter()
            .try_for_each(|tx| bdl.append(tx));
        chans[chan].bdl = Some(bdl);
        match appended {
            Ok(()) => {
                shared.set_state(ChanState::Configured);
                debug!("gdma{} chan {}: {} descriptors", self.id(), chan, entries);
                Ok(())
            }
            Err(e) => {
                shared.set_state(ChanState::Indeterminate);
                warn!(
                    "gdma{} chan {}: setup aborted ({}), revoke before reuse",
                    self.id(),
                    chan,
                    e
                );
                Err(e.into())
            }
        }
    }

    /// Program `chan` for a single register-driven copy. No descriptor
    /// memory is used.
    pub fn configure_channel(
        &self,
        chan: ChanId,
        tx: &Transaction,
        done_handler: Option<Arc<dyn ChanEventHandler>>,
        timeout: Timeout,
    ) -> Result<()> {
        self.check_chan(chan);
        let mut inner = self.control(timeout)?;
        let shared = &self.chans[chan];
        if shared.state() != ChanState::Unconfigured {
            return Err(GdmaError::ChannelBusy);
        }
        if !self.config.caps.contains(GdmaCaps::DIRECT) {
            return Err(GdmaError::InvalidRequest);
        }
        tx.validate()?;

        self.hw
            .allocate_chan(chan, &ChanHwConfig::direct(tx.src, tx.dst, tx.len))?;
        inner.chans[chan].allocated = true;
        shared.handlers.lock()[ChanEvent::TransEnd as usize] = done_handler;
        shared.set_state(ChanState::Configured);
        Ok(())
    }

    /// Release `chan`: its descriptor memory, its hardware allocation and
    /// its handlers. Revoking an unconfigured channel does nothing.
    ///
    /// A running transfer is stopped first. Teardown continues past
    /// failures; the first one is returned.
    pub fn revoke_channel(&self, chan: ChanId, timeout: Timeout) -> Result<()> {
        self.check_chan(chan);
        let mut inner = self.control(timeout)?;
        let shared = &self.chans[chan];
        let Inner { pool, chans, .. } = &mut *inner;
        let ctl = &mut chans[chan];

        let mut first = None;
        if matches!(shared.state(), ChanState::Armed | ChanState::Transferring) {
            if let Err(e) = self.hw.stop_chan(chan) {
                error!("gdma{} chan {}: stop: {}", self.id(), chan, e);
                first.get_or_insert(GdmaError::from(e));
            }
        }
        if let Some(bdl) = ctl.bdl.take() {
            if let Err(e) = pool.free(bdl.as_ptr()) {
                error!("gdma{} chan {}: {}", self.id(), chan, e);
                first.get_or_insert(GdmaError::PoolInit(e));
            }
        }
        if ctl.allocated {
            ctl.allocated = false;
            if let Err(e) = self.hw.deallocate_chan(chan) {
                error!("gdma{} chan {}: deallocate: {}", self.id(), chan, e);
                first.get_or_insert(GdmaError::from(e));
            }
        }
        *shared.handlers.lock() = [None, None, None];
        shared.set_state(ChanState::Unconfigured);

        first.map_or(Ok(()), Err)
    }

    /// Kick off the configured transfer on `chan` and return at once.
    pub fn start_channel(&self, chan: ChanId, timeout: Timeout) -> Result<()> {
        self.check_chan(chan);
        let _inner = self.control(timeout)?;
        let shared = &self.chans[chan];
        match shared.state() {
            ChanState::Configured => {}
            ChanState::Armed | ChanState::Transferring => return Err(GdmaError::ChannelBusy),
            ChanState::Unconfigured | ChanState::Indeterminate => {
                return Err(GdmaError::ChannelNotConfigured)
            }
        }

        shared.set_state(ChanState::Armed);
        if let Err(e) = self.hw.start_transfer(chan) {
            shared.set_state(ChanState::Configured);
            return Err(e.into());
        }
        // completion may already have moved the channel on
        shared.transition(&[ChanState::Armed], ChanState::Transferring);
        Ok(())
    }

    /// Abort the transfer on `chan`. Data in flight is lost; the channel
    /// stays configured and can be started again.
    pub fn stop_channel(&self, chan: ChanId, timeout: Timeout) -> Result<()> {
        self.check_chan(chan);
        let _inner = self.control(timeout)?;
        let shared = &self.chans[chan];
        match shared.state() {
            ChanState::Armed | ChanState::Transferring => {
                self.hw.stop_chan(chan)?;
                shared.set_state(ChanState::Configured);
                Ok(())
            }
            ChanState::Configured => Ok(()),
            ChanState::Unconfigured | ChanState::Indeterminate => {
                Err(GdmaError::ChannelNotConfigured)
            }
        }
    }
}
