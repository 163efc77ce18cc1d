// Licensed under the Apache-2.0 license

//! Command queue: slot allocation, chain linking and release

use crate::error::{IpcqError, IpcqResult};
use crate::layout::{
    cmd_param_offset, cmd_slot_offset, CmdParam, CmdType, SlotFlags, CMD_QUEUE_FLAGS, CMD_SLOTS,
    MAX_CHAIN, QUEUE_ACTIVE,
};
use crate::shmem::{read_struct, write_struct, SharedRegion};
use coproc_host_osal::time::sleep;
use coproc_host_osal::{Duration, Instant, Mutex};
use log::{debug, error, warn};
use std::sync::Arc;

/// Allocation back-off policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocPolicy {
    /// How long to wait for the firmware to mark the queue active
    pub active_wait: Duration,
    pub active_poll: Duration,
    /// Scans of the slot array before giving up; at least one scan is
    /// always made
    pub retries: u32,
    /// Sleep between scans; the slot lock is not held
    pub retry_interval: Duration,
}

impl Default for AllocPolicy {
    fn default() -> Self {
        Self {
            active_wait: Duration::from_micros(1000),
            active_poll: Duration::from_micros(10),
            retries: 3,
            retry_interval: Duration::from_millis(10),
        }
    }
}

/// Slots reserved together for one command, head first.
///
/// Only [`CommandQueue::allocate`] builds one, so a chain is never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chain {
    req_id: u32,
    slots: Vec<usize>,
}

impl Chain {
    pub fn req_id(&self) -> u32 {
        self.req_id
    }

    pub fn slots(&self) -> &[usize] {
        &self.slots
    }

    pub fn head(&self) -> usize {
        self.slots[0]
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

struct Cursor {
    next_slot: usize,
    next_req_id: u32,
}

pub struct CommandQueue {
    region: Arc<dyn SharedRegion>,
    policy: AllocPolicy,
    cursor: Mutex<Cursor>,
}

impl CommandQueue {
    pub fn new(region: Arc<dyn SharedRegion>, policy: AllocPolicy) -> Self {
        Self {
            region,
            policy,
            cursor: Mutex::new(Cursor {
                next_slot: 0,
                next_req_id: 0,
            }),
        }
    }

    /// Restart the search cursor and request ids, as at firmware boot
    pub fn reset(&self) {
        let mut cursor = self.cursor.lock_or_recover();
        cursor.next_slot = 0;
        cursor.next_req_id = 0;
    }

    /// Place the search cursor; the next allocation starts scanning at `slot`
    pub fn set_cursor(&self, slot: usize) -> IpcqResult<()> {
        if slot >= CMD_SLOTS {
            return Err(IpcqError::BadSlot { slot });
        }
        self.cursor.lock()?.next_slot = slot;
        Ok(())
    }

    /// The firmware has marked the queue ready for commands
    pub fn is_active(&self) -> IpcqResult<bool> {
        Ok(self.region.load(CMD_QUEUE_FLAGS)? & QUEUE_ACTIVE != 0)
    }

    fn wait_active(&self) -> IpcqResult<()> {
        let deadline = Instant::now().saturating_add(self.policy.active_wait);
        loop {
            if self.is_active()? {
                return Ok(());
            }
            if deadline.remaining().is_zero() {
                warn!("command queue not active after {:?}", self.policy.active_wait);
                return Err(IpcqError::NotActive);
            }
            sleep(self.policy.active_poll)?;
        }
    }

    fn flags(&self, slot: usize) -> IpcqResult<SlotFlags> {
        Ok(SlotFlags::from_raw(self.region.load(cmd_slot_offset(slot))?))
    }

    fn set_flags(&self, slot: usize, flags: SlotFlags) -> IpcqResult<()> {
        self.region.store(cmd_slot_offset(slot), flags.raw())
    }

    /// Reserve `count` slots linked into one chain.
    pub fn allocate(&self, count: usize) -> IpcqResult<Chain> {
        if count == 0 || count > MAX_CHAIN {
            error!(
                "command chain of {} slots rejected (1..={} allowed)",
                count, MAX_CHAIN
            );
            return Err(IpcqError::InvalidChainLength {
                requested: count,
                max: MAX_CHAIN,
            });
        }

        self.wait_active()?;

        let attempts = self.policy.retries.max(1);
        for attempt in 1..=attempts {
            {
                let mut cursor = self.cursor.lock()?;
                if let Some(slots) = self.find_free(cursor.next_slot, count)? {
                    let req_id = cursor.next_req_id;
                    self.link(&slots, req_id)?;
                    cursor.next_req_id = cursor.next_req_id.wrapping_add(1);
                    cursor.next_slot = (slots[slots.len() - 1] + 1) % CMD_SLOTS;
                    debug!("command chain {:?} allocated for req {}", slots, req_id);
                    return Ok(Chain { req_id, slots });
                }
            }

            if attempt < attempts {
                warn!(
                    "no room for {} command slot(s), retry {}/{}",
                    count, attempt, attempts
                );
                sleep(self.policy.retry_interval)?;
            }
        }

        warn!("command queue full, {} slot(s) unavailable", count);
        Err(IpcqError::NoFreeSlot { attempts })
    }

    /// First `count` free slots in ring order from `start`, or none if the
    /// queue cannot hold the whole chain right now.
    fn find_free(&self, start: usize, count: usize) -> IpcqResult<Option<Vec<usize>>> {
        let mut slots = Vec::with_capacity(count);
        for i in 0..CMD_SLOTS {
            let slot = (start + i) % CMD_SLOTS;
            if !self.flags(slot)?.used() {
                slots.push(slot);
                if slots.len() == count {
                    return Ok(Some(slots));
                }
            }
        }
        Ok(None)
    }

    fn link(&self, slots: &[usize], req_id: u32) -> IpcqResult<()> {
        let head = slots[0];
        for (i, &slot) in slots.iter().enumerate() {
            let mut flags = SlotFlags::default();
            flags.set_used(true);
            flags.set_head_id(head as u8);
            flags.set_head(i == 0);
            match slots.get(i + 1) {
                Some(&next) => {
                    flags.set_has_next(true);
                    flags.set_next_id(next as u8);
                }
                None => flags.set_tail(true),
            }
            self.region.store(cmd_param_offset(slot) + 4, req_id)?;
            self.set_flags(slot, flags)?;
        }
        Ok(())
    }

    /// Fill the payload of every slot in `chain`. The request id is forced to
    /// the chain's own.
    pub fn write(&self, chain: &Chain, params: &[CmdParam]) -> IpcqResult<()> {
        if params.len() != chain.len() {
            return Err(IpcqError::InvalidChainLength {
                requested: params.len(),
                max: chain.len(),
            });
        }
        for (&slot, param) in chain.slots.iter().zip(params) {
            let mut param = *param;
            param.cmd_id = chain.req_id;
            write_struct(self.region.as_ref(), cmd_param_offset(slot), &param)?;
        }
        Ok(())
    }

    pub fn read(&self, slot: usize) -> IpcqResult<CmdParam> {
        if slot >= CMD_SLOTS {
            return Err(IpcqError::BadSlot { slot });
        }
        read_struct(self.region.as_ref(), cmd_param_offset(slot))
    }

    /// Walk the chain containing `slot` and return its slots, head first.
    pub fn chain_of(&self, slot: usize) -> IpcqResult<Vec<usize>> {
        let _cursor = self.cursor.lock()?;
        self.walk(slot)
    }

    fn walk(&self, slot: usize) -> IpcqResult<Vec<usize>> {
        if slot >= CMD_SLOTS {
            return Err(IpcqError::BadSlot { slot });
        }
        let flags = self.flags(slot)?;
        if !flags.used() {
            return Err(IpcqError::AlreadyFree { slot });
        }

        let head = if flags.head() {
            slot
        } else {
            warn!(
                "command slot {} is not a chain head, using head {}",
                slot,
                flags.head_id()
            );
            flags.head_id() as usize
        };

        let mut slots = Vec::new();
        let mut current = head;
        loop {
            let flags = self.flags(current)?;
            let well_formed = flags.used()
                && flags.head_id() as usize == head
                && flags.head() == (current == head)
                && slots.len() < MAX_CHAIN;
            if !well_formed {
                return Err(IpcqError::CorruptChain { slot: current });
            }
            slots.push(current);

            if flags.tail() {
                return Ok(slots);
            }
            if !flags.has_next() || flags.next_id() as usize >= CMD_SLOTS {
                return Err(IpcqError::CorruptChain { slot: current });
            }
            current = flags.next_id() as usize;
        }
    }

    /// Release the chain containing `slot`.
    ///
    /// The whole chain is validated before any slot is cleared, so a rejected
    /// free leaves the queue untouched.
    pub fn free(&self, slot: usize) -> IpcqResult<usize> {
        let _cursor = self.cursor.lock()?;
        let slots = match self.walk(slot) {
            Ok(slots) => slots,
            Err(e) => {
                error!("command slot {} free rejected: {}", slot, e);
                return Err(e);
            }
        };

        for &slot in &slots {
            self.set_flags(slot, SlotFlags::default())?;
            self.region
                .store(cmd_param_offset(slot) + 8, CmdType::None.into())?;
        }
        debug!("command chain {:?} freed", slots);
        Ok(slots.len())
    }

    pub fn in_use_count(&self) -> IpcqResult<usize> {
        let mut used = 0;
        for slot in 0..CMD_SLOTS {
            if self.flags(slot)?.used() {
                used += 1;
            }
        }
        Ok(used)
    }

    pub fn slot_flags(&self, slot: usize) -> IpcqResult<SlotFlags> {
        if slot >= CMD_SLOTS {
            return Err(IpcqError::BadSlot { slot });
        }
        self.flags(slot)
    }
}
