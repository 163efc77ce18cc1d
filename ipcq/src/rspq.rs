// Licensed under the Apache-2.0 license

//! Response queue: slot resolution, release and flow control

use crate::addr::AddressMap;
use crate::error::{IpcqError, IpcqResult};
use crate::layout::{
    rsp_param_offset, rsp_slot_at, rsp_slot_offset, RspParam, SlotFlags, QUEUE_ACTIVE,
    RSP_QUEUE_FLAGS, RSP_SLOTS,
};
use crate::pending::Mail;
use crate::shmem::{read_struct, SharedRegion};
use coproc_host_mailbox::{Mailbox, MailWord};
use coproc_host_osal::AtomicBool;
use core::sync::atomic::Ordering;
use log::{debug, info, warn};
use std::sync::Arc;

/// A response taken off the pending pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Written by the firmware into a shared slot; the slot stays in use
    /// until [`ResponseQueue::release`]
    Slot { slot: usize, param: RspParam },
    /// Built on the host, nothing to give back
    Heap(RspParam),
}

impl Response {
    pub fn param(&self) -> &RspParam {
        match self {
            Response::Slot { param, .. } => param,
            Response::Heap(param) => param,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Response::Heap(_))
    }
}

pub struct ResponseQueue {
    region: Arc<dyn SharedRegion>,
    map: AddressMap,
    mailbox: Arc<Mailbox>,
    /// Firmware reported it ran out of response slots and waits for room
    starved: AtomicBool,
}

impl ResponseQueue {
    pub fn new(region: Arc<dyn SharedRegion>, map: AddressMap, mailbox: Arc<Mailbox>) -> Self {
        Self {
            region,
            map,
            mailbox,
            starved: AtomicBool::new(false),
        }
    }

    /// Clear every response slot and mark the queue ready for the firmware
    pub fn init(&self) -> IpcqResult<()> {
        for slot in 0..RSP_SLOTS {
            self.region.store(rsp_slot_offset(slot), 0)?;
        }
        self.starved.store(false, Ordering::SeqCst);
        self.region.store(RSP_QUEUE_FLAGS, QUEUE_ACTIVE)?;
        debug!("response queue active");
        Ok(())
    }

    /// Reject further firmware writes
    pub fn deinit(&self) -> IpcqResult<()> {
        let flags = self.region.load(RSP_QUEUE_FLAGS)?;
        self.region.store(RSP_QUEUE_FLAGS, flags & !QUEUE_ACTIVE)?;
        self.starved.store(false, Ordering::SeqCst);
        debug!("response queue inactive");
        Ok(())
    }

    pub fn is_active(&self) -> IpcqResult<bool> {
        Ok(self.region.load(RSP_QUEUE_FLAGS)? & QUEUE_ACTIVE != 0)
    }

    fn slot_for(&self, addr: u32) -> IpcqResult<usize> {
        let offset = self.map.to_host(addr)?;
        rsp_slot_at(offset).ok_or(IpcqError::AddressOutOfRange { addr: addr as u64 })
    }

    /// Request id a record answers, without consuming it
    pub fn peek_rep_id(&self, mail: &Mail) -> IpcqResult<u32> {
        match mail {
            Mail::Mailbox(addr) => {
                let slot = self.slot_for(*addr)?;
                self.region.load(rsp_param_offset(slot) + 4)
            }
            Mail::Synthetic(param) => Ok(param.rep_id),
        }
    }

    /// Turn a pending record into the response it refers to
    pub fn resolve(&self, mail: &Mail) -> IpcqResult<Response> {
        match mail {
            Mail::Mailbox(addr) => {
                let slot = self.slot_for(*addr)?;
                let param = read_struct(self.region.as_ref(), rsp_param_offset(slot))?;
                Ok(Response::Slot { slot, param })
            }
            Mail::Synthetic(param) => Ok(Response::Heap(*param)),
        }
    }

    /// Give a response slot back to the firmware, telling it about the room
    /// if it had reported the queue full.
    pub fn release(&self, response: &Response) -> IpcqResult<()> {
        let slot = match response {
            Response::Slot { slot, .. } => *slot,
            Response::Heap(_) => return Ok(()),
        };

        let mut flags = SlotFlags::from_raw(self.region.load(rsp_slot_offset(slot))?);
        flags.set_used(false);
        self.region.store(rsp_slot_offset(slot), flags.raw())?;
        // cmd_type and extra share the word after ret
        self.region.store(rsp_param_offset(slot) + 12, 0)?;
        debug!("response slot {} released", slot);

        if self.starved.swap(false, Ordering::SeqCst) {
            if let Err(e) = self.mailbox.post(MailWord::RSP_QUEUE_FREE) {
                self.starved.store(true, Ordering::SeqCst);
                warn!("could not signal response queue room: {}", e);
                return Err(e.into());
            }
            info!("response queue room signalled to coprocessor");
        }
        Ok(())
    }

    /// Record an RSP_QUEUE_FULL control word from the firmware
    pub fn note_queue_full(&self) {
        info!("coprocessor reports response queue full");
        self.starved.store(true, Ordering::SeqCst);
    }

    pub fn is_starved(&self) -> bool {
        self.starved.load(Ordering::SeqCst)
    }
}
