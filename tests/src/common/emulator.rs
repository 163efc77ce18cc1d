// Licensed under the Apache-2.0 license

//! Emulated coprocessor
//!
//! Implements the mailbox registers on the host side and runs a firmware
//! thread over the same shared region the queue uses. The firmware reads
//! each posted command chain, answers into a free response slot echoing the
//! request id, and posts the response address back. When every response
//! slot is taken it reports RSP_QUEUE_FULL and holds further responses until
//! the host signals RSP_QUEUE_FREE.

use coproc_host_ipcq::layout::{
    cmd_param_offset, cmd_slot_at, cmd_slot_offset, rsp_param_offset, rsp_slot_offset, CmdParam,
    CmdType, IpcHeader, RspParam, SlotFlags, CMD_QUEUE_FLAGS, MAX_CHAIN, QUEUE_ACTIVE,
    RSP_QUEUE_FLAGS, RSP_RESULT_WORDS, RSP_SLOTS,
};
use coproc_host_ipcq::shmem::{read_struct, write_struct};
use coproc_host_ipcq::{AddressMap, HeapRegion, IpcqError, IpcqResult, SharedRegion};
use coproc_host_mailbox::{class, MailWord, Mailbox, MailboxRegisters};
use coproc_host_osal::time::sleep;
use coproc_host_osal::{AtomicBool, Condvar, Duration, Mutex, ThreadBuilder, ThreadHandle};
use core::sync::atomic::Ordering;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};

/// Host-to-coprocessor words the emulated inbox holds before reporting full
const INBOX_DEPTH: usize = 8;

/// How the firmware treats the next command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Answer immediately with the command's type and its first parameters
    Echo,
    /// Never answer
    Silent,
    /// Answer with an error-typed response
    Fault(CmdType),
    /// Keep the answer until [`EmulatedCoprocessor::release_held`]
    Hold,
    /// Answer after sleeping
    Delay(Duration),
}

/// A command chain as the firmware read it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedCommand {
    pub cmd_id: u32,
    pub header: IpcHeader,
    pub cmd_type: u32,
    pub params: Vec<u32>,
    pub chain: Vec<usize>,
}

#[derive(Default)]
struct Registers {
    to_firmware: VecDeque<u32>,
    to_host: VecDeque<u32>,
    irq_enabled: bool,
}

struct Firmware {
    behavior: Behavior,
    script: VecDeque<Behavior>,
    received: Vec<ReceivedCommand>,
    held: Vec<RspParam>,
    deferred: VecDeque<RspParam>,
    reported_full: bool,
    full_reports: u32,
    free_signals: u32,
    usable_rsp_slots: usize,
}

pub struct EmulatedCoprocessor {
    region: Arc<HeapRegion>,
    map: AddressMap,
    regs: Mutex<Registers>,
    doorbell: Condvar,
    firmware: Mutex<Firmware>,
    irq: Mutex<Option<Weak<Mailbox>>>,
    inbox_full: AtomicBool,
    stop: AtomicBool,
    thread: Mutex<Option<ThreadHandle>>,
}

impl EmulatedCoprocessor {
    pub fn new(region: Arc<HeapRegion>, map: AddressMap) -> Arc<Self> {
        Arc::new(Self {
            region,
            map,
            regs: Mutex::new(Registers::default()),
            doorbell: Condvar::new(),
            firmware: Mutex::new(Firmware {
                behavior: Behavior::Echo,
                script: VecDeque::new(),
                received: Vec::new(),
                held: Vec::new(),
                deferred: VecDeque::new(),
                reported_full: false,
                full_reports: 0,
                free_signals: 0,
                usable_rsp_slots: RSP_SLOTS,
            }),
            irq: Mutex::new(None),
            inbox_full: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            thread: Mutex::new(None),
        })
    }

    /// Route the inbound interrupt line to `mailbox`
    pub fn attach_irq(&self, mailbox: &Arc<Mailbox>) {
        *self.irq.lock_or_recover() = Some(Arc::downgrade(mailbox));
    }

    pub fn start(self: &Arc<Self>) -> IpcqResult<()> {
        let mut thread = self.thread.lock()?;
        if thread.is_some() {
            return Ok(());
        }
        self.stop.store(false, Ordering::SeqCst);
        let firmware = Arc::clone(self);
        *thread = Some(
            ThreadBuilder::new()
                .name("emulated-fw")
                .spawn(move || firmware.run())?,
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        drop(self.regs.lock_or_recover());
        self.doorbell.notify_all();
        if let Some(handle) = self.thread.lock_or_recover().take() {
            if let Err(e) = handle.join() {
                warn!("emulated firmware thread: {}", e);
            }
        }
    }

    /// Firmware came up: accept commands
    pub fn boot(&self) -> IpcqResult<()> {
        {
            let mut fw = self.firmware.lock_or_recover();
            fw.deferred.clear();
            fw.held.clear();
            fw.reported_full = false;
        }
        self.region.store(CMD_QUEUE_FLAGS, QUEUE_ACTIVE)?;
        info!("emulated firmware running");
        Ok(())
    }

    /// Firmware stopped: refuse commands, forget unanswered work
    pub fn halt(&self) -> IpcqResult<()> {
        self.region.store(CMD_QUEUE_FLAGS, 0)?;
        let mut fw = self.firmware.lock_or_recover();
        fw.deferred.clear();
        fw.held.clear();
        info!("emulated firmware halted");
        Ok(())
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        self.firmware.lock_or_recover().behavior = behavior;
    }

    /// Behaviour for the next commands, in order, before falling back to the
    /// default set by [`Self::set_behavior`]
    pub fn script(&self, behaviors: &[Behavior]) {
        self.firmware
            .lock_or_recover()
            .script
            .extend(behaviors.iter().copied());
    }

    /// Pretend only `count` response slots exist
    pub fn limit_response_slots(&self, count: usize) {
        self.firmware.lock_or_recover().usable_rsp_slots = count.min(RSP_SLOTS);
    }

    /// Make the host-to-coprocessor register report full
    pub fn set_inbox_full(&self, full: bool) {
        self.inbox_full.store(full, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<ReceivedCommand> {
        self.firmware.lock_or_recover().received.clone()
    }

    pub fn full_reports(&self) -> u32 {
        self.firmware.lock_or_recover().full_reports
    }

    pub fn free_signals(&self) -> u32 {
        self.firmware.lock_or_recover().free_signals
    }

    pub fn held_count(&self) -> usize {
        self.firmware.lock_or_recover().held.len()
    }

    pub fn deferred_count(&self) -> usize {
        self.firmware.lock_or_recover().deferred.len()
    }

    /// Answer every held command. Returns how many were answered.
    pub fn release_held(&self) -> usize {
        let held: Vec<RspParam> = self.firmware.lock_or_recover().held.drain(..).collect();
        for rsp in &held {
            if let Err(e) = self.respond(*rsp) {
                warn!("held response {} not delivered: {}", rsp.rep_id, e);
            }
        }
        held.len()
    }

    /// Put a raw word on the coprocessor-to-host register and raise the irq
    pub fn raise(&self, word: MailWord) {
        let irq_enabled = {
            let mut regs = self.regs.lock_or_recover();
            regs.to_host.push_back(word.raw());
            regs.irq_enabled
        };
        if !irq_enabled {
            return;
        }
        let mailbox = self.irq.lock_or_recover().as_ref().and_then(Weak::upgrade);
        if let Some(mailbox) = mailbox {
            mailbox.handle_irq();
        }
    }

    /// Answer `rep_id` directly, whether or not such a command was seen
    pub fn answer(&self, rsp: RspParam) -> IpcqResult<()> {
        self.respond(rsp)
    }

    fn run(self: Arc<Self>) {
        debug!("emulated firmware thread started");
        loop {
            let word = {
                let mut regs = self.regs.lock_or_recover();
                loop {
                    if self.stop.load(Ordering::SeqCst) {
                        debug!("emulated firmware thread stopping");
                        return;
                    }
                    if let Some(word) = regs.to_firmware.pop_front() {
                        break word;
                    }
                    match self.doorbell.wait_timeout(regs, Duration::from_millis(20)) {
                        Ok((guard, _)) => regs = guard,
                        Err(_) => return,
                    }
                }
            };
            if let Err(e) = self.process(MailWord::from_raw(word)) {
                warn!("emulated firmware rejected 0x{:08x}: {}", word, e);
            }
        }
    }

    fn process(&self, word: MailWord) -> IpcqResult<()> {
        if word == MailWord::RSP_QUEUE_FREE {
            return self.flush_deferred();
        }
        if word.class() != class::DEFAULT {
            warn!("emulated firmware ignoring 0x{:08x}", word.raw());
            return Ok(());
        }

        let command = self.read_chain(word.payload())?;
        let rsp = RspParam {
            header: command.header.raw(),
            rep_id: command.cmd_id,
            ret: 0,
            cmd_type: command.cmd_type as u16,
            extra: command.chain.len() as u16,
            results: first_results(&command.params),
        };

        let behavior = {
            let mut fw = self.firmware.lock_or_recover();
            fw.received.push(command);
            let default = fw.behavior;
            fw.script.pop_front().unwrap_or(default)
        };

        match behavior {
            Behavior::Echo => self.respond(rsp),
            Behavior::Silent => Ok(()),
            Behavior::Fault(kind) => self.respond(RspParam {
                cmd_type: u32::from(kind) as u16,
                ret: 0xDEAD,
                ..rsp
            }),
            Behavior::Hold => {
                self.firmware.lock_or_recover().held.push(rsp);
                Ok(())
            }
            Behavior::Delay(delay) => {
                sleep(delay)?;
                self.respond(rsp)
            }
        }
    }

    fn read_chain(&self, addr: u32) -> IpcqResult<ReceivedCommand> {
        let offset = self.map.to_host(addr)?;
        let head = cmd_slot_at(offset).ok_or(IpcqError::AddressOutOfRange { addr: addr as u64 })?;

        let first: CmdParam = read_struct(&*self.region, cmd_param_offset(head))?;
        let mut command = ReceivedCommand {
            cmd_id: first.cmd_id,
            header: IpcHeader::from_raw(first.header),
            cmd_type: first.cmd_type,
            params: Vec::new(),
            chain: Vec::new(),
        };

        let mut slot = head;
        loop {
            let flags = SlotFlags::from_raw(self.region.load(cmd_slot_offset(slot))?);
            if !flags.used() || command.chain.len() >= MAX_CHAIN {
                return Err(IpcqError::CorruptChain { slot });
            }
            let param: CmdParam = read_struct(&*self.region, cmd_param_offset(slot))?;
            let length = (param.length as usize).min(param.params.len());
            command.params.extend_from_slice(&param.params[..length]);
            command.chain.push(slot);
            if flags.tail() || !flags.has_next() {
                break;
            }
            slot = flags.next_id() as usize;
        }
        debug!(
            "emulated firmware got command {} over {:?}",
            command.cmd_id, command.chain
        );
        Ok(command)
    }

    fn respond(&self, rsp: RspParam) -> IpcqResult<()> {
        let report_full = {
            let mut fw = self.firmware.lock_or_recover();
            if fw.deferred.is_empty() && self.deliver(rsp, fw.usable_rsp_slots)? {
                return Ok(());
            }
            fw.deferred.push_back(rsp);
            if fw.reported_full {
                false
            } else {
                fw.reported_full = true;
                fw.full_reports += 1;
                true
            }
        };
        if report_full {
            info!("emulated firmware out of response slots");
            self.raise(MailWord::RSP_QUEUE_FULL);
        }
        Ok(())
    }

    fn flush_deferred(&self) -> IpcqResult<()> {
        let mut report_full = false;
        {
            let mut fw = self.firmware.lock_or_recover();
            fw.free_signals += 1;
            fw.reported_full = false;
            while let Some(rsp) = fw.deferred.pop_front() {
                if !self.deliver(rsp, fw.usable_rsp_slots)? {
                    fw.deferred.push_front(rsp);
                    fw.reported_full = true;
                    fw.full_reports += 1;
                    report_full = true;
                    break;
                }
            }
        }
        if report_full {
            self.raise(MailWord::RSP_QUEUE_FULL);
        }
        Ok(())
    }

    /// Write `rsp` into a free response slot and post its address. Returns
    /// `false` when no slot is free.
    fn deliver(&self, rsp: RspParam, usable: usize) -> IpcqResult<bool> {
        if self.region.load(RSP_QUEUE_FLAGS)? & QUEUE_ACTIVE == 0 {
            warn!("response queue inactive, dropping answer to {}", rsp.rep_id);
            return Ok(true);
        }
        for slot in 0..usable {
            let mut flags = SlotFlags::from_raw(self.region.load(rsp_slot_offset(slot))?);
            if flags.used() {
                continue;
            }
            write_struct(&*self.region, rsp_param_offset(slot), &rsp)?;
            flags.set_used(true);
            self.region.store(rsp_slot_offset(slot), flags.raw())?;

            let addr = self.map.to_coproc(rsp_param_offset(slot))?;
            self.raise(MailWord::new(class::DEFAULT, addr)?);
            return Ok(true);
        }
        Ok(false)
    }
}

fn first_results(params: &[u32]) -> [u32; RSP_RESULT_WORDS] {
    let mut results = [0; RSP_RESULT_WORDS];
    let count = params.len().min(RSP_RESULT_WORDS);
    results[..count].copy_from_slice(&params[..count]);
    results
}

impl MailboxRegisters for EmulatedCoprocessor {
    fn outbound_full(&self) -> bool {
        self.inbox_full.load(Ordering::SeqCst)
            || self.regs.lock_or_recover().to_firmware.len() >= INBOX_DEPTH
    }

    fn write_outbound(&self, word: u32) {
        self.regs.lock_or_recover().to_firmware.push_back(word);
        self.doorbell.notify_all();
    }

    fn inbound_pending(&self) -> bool {
        !self.regs.lock_or_recover().to_host.is_empty()
    }

    fn read_inbound(&self) -> u32 {
        self.regs
            .lock_or_recover()
            .to_host
            .front()
            .copied()
            .unwrap_or(0)
    }

    fn clear_inbound_pending(&self) {
        self.regs.lock_or_recover().to_host.pop_front();
    }

    fn set_interrupt_enabled(&self, enabled: bool) {
        self.regs.lock_or_recover().irq_enabled = enabled;
    }
}
