// Licensed under the Apache-2.0 license

//! Pending-notification pool
//!
//! Hands received mail from interrupt-equivalent context to threads blocked
//! in a response wait. A fixed set of reserved records covers normal
//! traffic; bursts beyond it take overflow records up to a hard limit.

use crate::error::{IpcqError, IpcqResult};
use crate::layout::RspParam;
use bitfield::bitfield;
use coproc_host_osal::{Condvar, Duration, Instant, Mutex};
use log::{debug, warn};
use std::collections::VecDeque;

bitfield! {
    /// Origin of a pending record
    #[derive(Copy, Clone, PartialEq, Eq, Default)]
    pub struct RecordFlags(u32);
    impl Debug;
    pub used, set_used: 0;
    /// Backed by one of the reserved records
    pub reserved, set_reserved: 4;
    /// Backed by an overflow allocation
    pub heap, set_heap: 5;
    /// Produced in interrupt-equivalent context
    pub isr, set_isr: 8;
    /// Payload is a raw mailbox word, not a host-built response
    pub mbox, set_mbox: 9;
}

/// Payload of a pending record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mail {
    /// Coprocessor-frame address of a response slot
    Mailbox(u32),
    /// Response synthesized on the host
    Synthetic(RspParam),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingMail {
    pub mail: Mail,
    pub flags: RecordFlags,
    reserved_index: Option<usize>,
}

/// What a waiter wants done with a record it was shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Hand the record to this waiter
    Take,
    /// Leave it queued for someone else
    Skip,
    /// Remove it; nobody will ever claim it
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingConfig {
    pub reserved_records: usize,
    pub overflow_limit: usize,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            reserved_records: 32,
            overflow_limit: 256,
        }
    }
}

/// Record usage at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingStats {
    pub queued: usize,
    pub reserved_in_use: usize,
    pub overflow_in_use: usize,
}

struct PoolState {
    reserved: Vec<bool>,
    hint: usize,
    overflow_in_use: usize,
    queue: VecDeque<PendingMail>,
}

impl PoolState {
    fn claim_reserved(&mut self) -> Option<usize> {
        let count = self.reserved.len();
        let found = (0..count)
            .map(|i| (self.hint + i) % count)
            .find(|&i| !self.reserved[i])?;
        self.reserved[found] = true;
        self.hint = (found + 1) % count;
        Some(found)
    }

    fn retire(&mut self, record: &PendingMail) {
        match record.reserved_index {
            Some(index) => {
                if let Some(slot) = self.reserved.get_mut(index) {
                    *slot = false;
                }
            }
            None => self.overflow_in_use = self.overflow_in_use.saturating_sub(1),
        }
    }
}

pub struct PendingPool {
    config: PendingConfig,
    state: Mutex<PoolState>,
    ready: Condvar,
}

impl PendingPool {
    pub fn new(config: PendingConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState {
                reserved: vec![false; config.reserved_records],
                hint: 0,
                overflow_in_use: 0,
                queue: VecDeque::with_capacity(config.reserved_records),
            }),
            ready: Condvar::new(),
        }
    }

    /// Queue `mail` and wake waiters. Safe to call from the mailbox listener.
    pub fn insert(&self, mail: Mail, from_irq: bool) -> IpcqResult<()> {
        let mut flags = RecordFlags::default();
        flags.set_used(true);
        flags.set_isr(from_irq);
        flags.set_mbox(matches!(mail, Mail::Mailbox(_)));

        {
            let mut state = self.state.lock()?;
            let reserved_index = state.claim_reserved();
            match reserved_index {
                Some(_) => flags.set_reserved(true),
                None => {
                    if state.overflow_in_use >= self.config.overflow_limit {
                        warn!(
                            "pending pool exhausted, dropping {:?} ({} overflow records)",
                            mail, state.overflow_in_use
                        );
                        return Err(IpcqError::PendingExhausted {
                            limit: self.config.overflow_limit,
                        });
                    }
                    state.overflow_in_use += 1;
                    flags.set_heap(true);
                }
            }
            state.queue.push_back(PendingMail {
                mail,
                flags,
                reserved_index,
            });
        }

        self.ready.notify_all();
        Ok(())
    }

    /// Block until `select` takes a record, `timeout` elapses, or
    /// `cancelled` reports true.
    ///
    /// Records are offered in arrival order. Discarded records are appended to
    /// `discarded` so the caller can release what they reference after the
    /// pool lock is dropped.
    pub fn wait_take<S, C>(
        &self,
        mut select: S,
        timeout: Duration,
        cancelled: C,
        discarded: &mut Vec<PendingMail>,
    ) -> IpcqResult<PendingMail>
    where
        S: FnMut(&PendingMail) -> Selection,
        C: Fn() -> bool,
    {
        let deadline = Instant::now().saturating_add(timeout);
        let mut state = self.state.lock()?;

        loop {
            let mut index = 0;
            while index < state.queue.len() {
                match select(&state.queue[index]) {
                    Selection::Take => {
                        if let Some(record) = state.queue.remove(index) {
                            state.retire(&record);
                            return Ok(record);
                        }
                    }
                    Selection::Discard => {
                        if let Some(record) = state.queue.remove(index) {
                            state.retire(&record);
                            debug!("pending pool discarding {:?}", record.mail);
                            discarded.push(record);
                        }
                    }
                    Selection::Skip => index += 1,
                }
            }

            if cancelled() {
                return Err(IpcqError::Cancelled);
            }

            let left = deadline.remaining();
            if left.is_zero() {
                return Err(IpcqError::Timeout);
            }
            let (guard, _) = self.ready.wait_timeout(state, left)?;
            state = guard;
        }
    }

    /// Remove every queued record
    pub fn drain(&self) -> Vec<PendingMail> {
        let mut state = self.state.lock_or_recover();
        let drained: Vec<PendingMail> = state.queue.drain(..).collect();
        for record in &drained {
            state.retire(record);
        }
        drained
    }

    /// Wake every waiter so it re-evaluates its cancellation state
    pub fn wake_all(&self) {
        // Taking the lock orders the wakeup after any state change the waker
        // made before calling us.
        drop(self.state.lock_or_recover());
        self.ready.notify_all();
    }

    pub fn stats(&self) -> PendingStats {
        let state = self.state.lock_or_recover();
        PendingStats {
            queued: state.queue.len(),
            reserved_in_use: state.reserved.iter().filter(|used| **used).count(),
            overflow_in_use: state.overflow_in_use,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stats().queued == 0
    }
}
