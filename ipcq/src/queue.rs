// Licensed under the Apache-2.0 license

//! IPC queue facade
//!
//! Ties the command queue, response queue, pending pool and watchdog to one
//! mailbox. Dispatches are tracked by request id from `send` until their
//! completion is handed to a waiter or they are abandoned.
//!
//! Lock order: pending pool, then dispatch tracking. Neither is held while
//! posting to the mailbox or releasing a response slot.

use crate::addr::AddressMap;
use crate::cmdq::{AllocPolicy, Chain, CommandQueue};
use crate::command::{Command, Completion, CompletionKind, Ticket};
use crate::error::{IpcqError, IpcqResult};
use crate::escalation::{ErrorEscalation, HardwareFault, Supervisor};
use crate::layout::{
    cmd_param_offset, CmdType, HostCtrlSub, IpcFunc, IpcHeader, RspParam, CMD_SLOTS, REGION_SIZE,
};
use crate::pending::{Mail, PendingConfig, PendingMail, PendingPool, PendingStats, Selection};
use crate::rspq::{Response, ResponseQueue};
use crate::shmem::SharedRegion;
use crate::trace::{Direction, Transaction, TransactionLog};
use crate::watchdog::Watchdog;
use coproc_host_mailbox::{class, Delivery, ListenerId, MailWord, Mailbox};
use coproc_host_osal::{AtomicBool, AtomicU32, Duration, Mutex, StdTimer, Timer};
use core::sync::atomic::Ordering;
use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};

/// First id handed to host-handled commands, kept apart from firmware ids
const HOST_ID_BASE: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpcqConfig {
    pub alloc: AllocPolicy,
    pub pending: PendingConfig,
    /// Used by [`IpcQueue::wait_default`]
    pub wait_timeout: Duration,
    /// Watchdog for commands that do not bring their own
    pub default_watchdog: Option<Duration>,
    /// Transactions kept in the history ring; 0 disables it
    pub transaction_log: usize,
}

impl Default for IpcqConfig {
    fn default() -> Self {
        Self {
            alloc: AllocPolicy::default(),
            pending: PendingConfig::default(),
            wait_timeout: Duration::from_millis(2000),
            default_watchdog: None,
            transaction_log: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Dispatch {
    head: Option<usize>,
}

#[derive(Default)]
struct Tracking {
    outstanding: HashMap<u32, Dispatch>,
    retired: VecDeque<u32>,
}

impl Tracking {
    fn retire(&mut self, id: u32) -> Option<Dispatch> {
        let dispatch = self.outstanding.remove(&id)?;
        if self.retired.len() == 2 * CMD_SLOTS {
            self.retired.pop_front();
        }
        self.retired.push_back(id);
        Some(dispatch)
    }
}

pub struct IpcQueue {
    mailbox: Arc<Mailbox>,
    map: AddressMap,
    config: IpcqConfig,
    cmdq: CommandQueue,
    rspq: ResponseQueue,
    pending: PendingPool,
    watchdog: Watchdog,
    escalation: ErrorEscalation,
    history: TransactionLog,
    tracking: Mutex<Tracking>,
    listeners: Mutex<Vec<ListenerId>>,
    open: AtomicBool,
    epoch: AtomicU32,
    next_host_id: AtomicU32,
}

impl IpcQueue {
    /// Build the queue over `region` and attach it to `mailbox`.
    pub fn new(
        mailbox: Arc<Mailbox>,
        region: Arc<dyn SharedRegion>,
        map: AddressMap,
        config: IpcqConfig,
        supervisor: Arc<dyn Supervisor>,
    ) -> IpcqResult<Arc<Self>> {
        Self::with_timer(
            mailbox,
            region,
            map,
            config,
            supervisor,
            Arc::new(StdTimer::new()),
        )
    }

    pub fn with_timer(
        mailbox: Arc<Mailbox>,
        region: Arc<dyn SharedRegion>,
        map: AddressMap,
        config: IpcqConfig,
        supervisor: Arc<dyn Supervisor>,
        timer: Arc<dyn Timer>,
    ) -> IpcqResult<Arc<Self>> {
        for actual in [region.len(), map.len()] {
            if actual < REGION_SIZE {
                return Err(IpcqError::LayoutMismatch {
                    expected: REGION_SIZE,
                    actual,
                });
            }
        }

        let queue = Arc::new(Self {
            cmdq: CommandQueue::new(Arc::clone(&region), config.alloc),
            rspq: ResponseQueue::new(region, map, Arc::clone(&mailbox)),
            pending: PendingPool::new(config.pending),
            watchdog: Watchdog::new(timer),
            escalation: ErrorEscalation::new(supervisor),
            history: TransactionLog::new(config.transaction_log),
            tracking: Mutex::new(Tracking::default()),
            listeners: Mutex::new(Vec::new()),
            open: AtomicBool::new(false),
            epoch: AtomicU32::new(0),
            next_host_id: AtomicU32::new(HOST_ID_BASE),
            mailbox,
            map,
            config,
        });
        queue.attach()?;
        Ok(queue)
    }

    fn attach(self: &Arc<Self>) -> IpcqResult<()> {
        let weak = Arc::downgrade(self);
        let responses = self.mailbox.register_listener(
            class::DEFAULT,
            0,
            Arc::new(move |word: MailWord| match weak.upgrade() {
                Some(queue) => queue.on_response_mail(word),
                None => Delivery::Pass,
            }),
        )?;

        let weak: Weak<Self> = Arc::downgrade(self);
        let control = self.mailbox.register_listener(
            class::IPCQ_CTRL,
            0,
            Arc::new(move |word: MailWord| match weak.upgrade() {
                Some(queue) => queue.on_control_mail(word),
                None => Delivery::Pass,
            }),
        )?;

        self.listeners.lock()?.extend([responses, control]);
        Ok(())
    }

    /// Unregister from the mailbox. Idempotent.
    pub fn detach(&self) {
        let ids: Vec<ListenerId> = self.listeners.lock_or_recover().drain(..).collect();
        for id in ids {
            if let Err(e) = self.mailbox.unregister_listener(id) {
                warn!("ipcq listener {:?} not removed: {}", id, e);
            }
        }
    }

    fn on_response_mail(&self, word: MailWord) -> Delivery {
        if let Err(e) = self.pending.insert(Mail::Mailbox(word.payload()), true) {
            error!("response mail 0x{:08x} lost: {}", word.raw(), e);
        }
        Delivery::Handled
    }

    fn on_control_mail(&self, word: MailWord) -> Delivery {
        if word == MailWord::RSP_QUEUE_FULL {
            self.rspq.note_queue_full();
            Delivery::Handled
        } else {
            Delivery::Pass
        }
    }

    /// Ready the response channel at firmware boot
    pub fn open(&self) -> IpcqResult<()> {
        self.cmdq.reset();
        self.rspq.init()?;
        self.escalation.reset();
        self.tracking.lock()?.retired.clear();
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        self.open.store(true, Ordering::SeqCst);
        info!("ipc queue open (epoch {})", epoch);
        Ok(())
    }

    /// Whether `ticket` was issued since the last open. Tickets from an
    /// earlier open were retired when the queue closed.
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        ticket.epoch() == self.epoch.load(Ordering::SeqCst)
    }

    /// Tear the channel down at boot release. Every outstanding dispatch is
    /// abandoned and every pending record dropped. Never fails.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.rspq.deinit() {
            warn!("response queue deinit failed: {}", e);
        }

        let abandoned: Vec<(u32, Dispatch)> = {
            let mut tracking = self.tracking.lock_or_recover();
            let ids: Vec<u32> = tracking.outstanding.keys().copied().collect();
            ids.into_iter()
                .filter_map(|id| tracking.retire(id).map(|d| (id, d)))
                .collect()
        };
        self.watchdog.disarm_all();
        for (id, dispatch) in &abandoned {
            self.free_chain(*id, dispatch);
        }

        let dropped = self.drain_pending();
        self.pending.wake_all();
        info!(
            "ipc queue closed ({} dispatch(es) abandoned, {} record(s) dropped)",
            abandoned.len(),
            dropped
        );
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Drop every queued record, returning response slots they reference.
    pub fn drain_pending(&self) -> usize {
        let drained = self.pending.drain();
        let count = drained.len();
        self.release_records(drained);
        if count > 0 {
            debug!("drained {} pending record(s)", count);
        }
        count
    }

    /// Dispatch `command`.
    ///
    /// The chain is linked and written completely before its head address is
    /// posted; the post is the only point where the coprocessor can see it.
    pub fn send(self: &Arc<Self>, command: &Command) -> IpcqResult<Ticket> {
        if command.header.function() == Some(IpcFunc::HostCtrl) {
            return self.host_control(command);
        }
        if !self.is_open() {
            return Err(IpcqError::Closed);
        }

        let chain = self.cmdq.allocate(command.slot_count())?;
        let id = chain.req_id();
        if let Err(e) = self.cmdq.write(&chain, &command.to_slot_params()) {
            self.release_chain(&chain);
            return Err(e);
        }

        self.tracking.lock()?.outstanding.insert(
            id,
            Dispatch {
                head: Some(chain.head()),
            },
        );

        if command.is_frame_start() {
            self.escalation.reset();
        }

        let result = self.arm_watchdog(id, command).and_then(|_| {
            let addr = self.map.to_coproc(cmd_param_offset(chain.head()))?;
            self.mailbox.post(MailWord::new(class::DEFAULT, addr)?)?;
            Ok(())
        });
        if let Err(e) = result {
            warn!("dispatch {} not posted: {}", id, e);
            self.watchdog.disarm(id);
            self.tracking.lock_or_recover().retire(id);
            self.release_chain(&chain);
            return Err(e);
        }

        self.history
            .record(Direction::Sent, id, command.header.raw(), command.cmd_type);
        debug!(
            "dispatch {} posted ({} slot(s), head {})",
            id,
            chain.len(),
            chain.head()
        );
        Ok(Ticket::new(id, chain.len(), self.epoch.load(Ordering::SeqCst)))
    }

    fn release_chain(&self, chain: &Chain) {
        if let Err(e) = self.cmdq.free(chain.head()) {
            error!("chain for dispatch {} not freed: {}", chain.req_id(), e);
        }
    }

    fn watchdog_for(&self, command: &Command) -> Option<Duration> {
        if let Some(timeout) = command.watchdog {
            return Some(timeout);
        }
        if command.is_frame_start() {
            if let Some(&ms) = command.params.first() {
                if ms != 0 {
                    return Some(Duration::from_millis(ms as u64));
                }
            }
        }
        self.config.default_watchdog
    }

    fn arm_watchdog(self: &Arc<Self>, id: u32, command: &Command) -> IpcqResult<()> {
        let timeout = match self.watchdog_for(command) {
            Some(timeout) => timeout,
            None => return Ok(()),
        };
        let weak = Arc::downgrade(self);
        self.watchdog.arm(id, timeout, move || {
            if let Some(queue) = weak.upgrade() {
                queue.report_silence(id);
            }
        })
    }

    /// Commands the host answers itself
    fn host_control(&self, command: &Command) -> IpcqResult<Ticket> {
        let sub_func = command.header.sub_func();
        match HostCtrlSub::try_from(sub_func) {
            Ok(HostCtrlSub::ReleaseWait) => {
                let id = self.next_host_id.fetch_add(1, Ordering::SeqCst);
                self.tracking
                    .lock()?
                    .outstanding
                    .insert(id, Dispatch { head: None });
                let response = RspParam {
                    header: IpcHeader::new(IpcFunc::HostCtrl, sub_func, 0).raw(),
                    rep_id: id,
                    cmd_type: CmdType::Deinit as u16,
                    ..RspParam::default()
                };
                if let Err(e) = self.inject_response(response, false) {
                    self.tracking.lock_or_recover().retire(id);
                    return Err(e);
                }
                debug!("release-wait answered on the host as {}", id);
                Ok(Ticket::new(id, 0, self.epoch.load(Ordering::SeqCst)))
            }
            Err(_) => {
                error!("host control sub-function 0x{:02x} rejected", sub_func);
                Err(IpcqError::UnsupportedControl(sub_func))
            }
        }
    }

    /// Queue a host-built response exactly as if the coprocessor had sent it
    pub fn inject_response(&self, response: RspParam, from_irq: bool) -> IpcqResult<()> {
        self.pending.insert(Mail::Synthetic(response), from_irq)
    }

    /// Act as if the watchdog for `id` had fired. Returns `false` if no
    /// watchdog was armed for it, meaning a response already won.
    pub fn expire_dispatch(&self, id: u32) -> bool {
        if !self.watchdog.claim(id) {
            return false;
        }
        self.report_silence(id);
        true
    }

    fn report_silence(&self, id: u32) {
        let count = self.escalation.record_silence(id);
        error!("no response for dispatch {} (error count {})", id, count);

        let response = RspParam {
            header: IpcHeader::new(IpcFunc::HostCtrl, 0, 0).raw(),
            rep_id: id,
            cmd_type: CmdType::TimeoutNotify as u16,
            ..RspParam::default()
        };
        if let Err(e) = self.inject_response(response, true) {
            error!("timeout notification for dispatch {} lost: {}", id, e);
        }
    }

    fn is_outstanding(&self, id: u32) -> bool {
        self.tracking.lock_or_recover().outstanding.contains_key(&id)
    }

    fn is_known(&self, id: u32) -> (bool, bool) {
        let tracking = self.tracking.lock_or_recover();
        (
            tracking.outstanding.contains_key(&id),
            tracking.retired.contains(&id),
        )
    }

    /// Decide on one queued record for a waiter interested in `wanted`
    /// (`None` takes any live dispatch).
    fn select(&self, record: &PendingMail, wanted: Option<u32>) -> Selection {
        let rep_id = match self.rspq.peek_rep_id(&record.mail) {
            Ok(rep_id) => rep_id,
            Err(e) => {
                error!("pending record {:?} unreadable: {}", record.mail, e);
                return Selection::Discard;
            }
        };
        if !self.is_outstanding(rep_id) {
            return Selection::Discard;
        }
        match wanted {
            Some(id) if id != rep_id => Selection::Skip,
            _ => Selection::Take,
        }
    }

    /// Block until the response for `ticket` arrives.
    ///
    /// [`IpcqError::Timeout`] leaves the dispatch outstanding so the caller
    /// may wait again; [`IpcqError::Cancelled`] means it was abandoned.
    pub fn wait(&self, ticket: &Ticket, timeout: Duration) -> IpcqResult<Completion> {
        let id = ticket.id();
        if !self.is_current(ticket) {
            debug!("ticket {} from epoch {} outlived its queue", id, ticket.epoch());
            return Err(IpcqError::Cancelled);
        }
        match self.is_known(id) {
            (true, _) => {}
            (false, true) => return Err(IpcqError::Cancelled),
            (false, false) => return Err(IpcqError::UnknownTicket(id)),
        }

        let mut discarded = Vec::new();
        let taken = self.pending.wait_take(
            |record| self.select(record, Some(id)),
            timeout,
            || !self.is_outstanding(id),
            &mut discarded,
        );
        self.release_records(discarded);

        match taken {
            Ok(record) => self.complete(record),
            Err(IpcqError::Timeout) => {
                debug!("wait for dispatch {} timed out", id);
                Err(IpcqError::Timeout)
            }
            Err(e) => Err(e),
        }
    }

    pub fn wait_default(&self, ticket: &Ticket) -> IpcqResult<Completion> {
        self.wait(ticket, self.config.wait_timeout)
    }

    /// Take the next completion for any live dispatch. Returns
    /// [`IpcqError::Cancelled`] if a concurrent waiter completed the same
    /// dispatch first.
    pub fn read_any(&self, timeout: Duration) -> IpcqResult<Completion> {
        let mut discarded = Vec::new();
        let taken = self.pending.wait_take(
            |record| self.select(record, None),
            timeout,
            || !self.is_open(),
            &mut discarded,
        );
        self.release_records(discarded);
        self.complete(taken?)
    }

    fn complete(&self, record: PendingMail) -> IpcqResult<Completion> {
        let response = self.rspq.resolve(&record.mail).map_err(|e| {
            error!("response record {:?} unusable: {}", record.mail, e);
            e
        })?;
        let param = *response.param();
        let completion = Completion::from_response(&param, response.is_synthetic());
        let id = completion.id;

        // Another consumer may have taken the other half of a real/synthetic
        // pair and retired the dispatch first; only the retiring one reports.
        self.watchdog.disarm(id);
        let dispatch = self.tracking.lock_or_recover().retire(id);
        let Some(dispatch) = dispatch else {
            self.release_response(&response);
            debug!("dispatch {} already completed, duplicate dropped", id);
            return Err(IpcqError::Cancelled);
        };
        self.free_chain(id, &dispatch);
        self.release_response(&response);

        self.history
            .record(Direction::Received, id, param.header, completion.cmd_type);

        match completion.kind {
            CompletionKind::HardwareFault(kind) => {
                self.escalation.record_fault(HardwareFault {
                    dispatch_id: id,
                    kind,
                    ret: completion.ret,
                });
            }
            CompletionKind::Error(code) => {
                warn!("dispatch {} answered with error type 0x{:x}", id, code);
            }
            CompletionKind::CoprocessorSilent | CompletionKind::Done => {}
        }
        Ok(completion)
    }

    fn free_chain(&self, id: u32, dispatch: &Dispatch) {
        if let Some(head) = dispatch.head {
            if let Err(e) = self.cmdq.free(head) {
                error!("chain for dispatch {} not freed: {}", id, e);
            }
        }
    }

    fn release_response(&self, response: &Response) {
        if let Err(e) = self.rspq.release(response) {
            warn!("response release failed: {}", e);
        }
    }

    fn release_records(&self, records: Vec<PendingMail>) {
        for record in records {
            match self.rspq.resolve(&record.mail) {
                Ok(response) => self.release_response(&response),
                Err(e) => warn!("dropping unreadable record {:?}: {}", record.mail, e),
            }
        }
    }

    /// Give up on `ticket`: wake its waiter with [`IpcqError::Cancelled`],
    /// disarm its watchdog and free its command slots. Returns `false` if it
    /// had already completed.
    pub fn abandon(&self, ticket: &Ticket) -> bool {
        if !self.is_current(ticket) {
            return false;
        }
        let id = ticket.id();
        let dispatch = self.tracking.lock_or_recover().retire(id);
        let Some(dispatch) = dispatch else {
            return false;
        };
        self.watchdog.disarm(id);
        self.free_chain(id, &dispatch);
        self.pending.wake_all();
        info!("dispatch {} abandoned", id);
        true
    }

    /// Release queued records no live dispatch will ever claim
    pub fn purge_stale(&self) -> usize {
        let mut discarded = Vec::new();
        // A zero timeout makes this a single non-blocking pass
        let _ = self.pending.wait_take(
            |record| match self.select(record, None) {
                Selection::Discard => Selection::Discard,
                _ => Selection::Skip,
            },
            Duration::ZERO,
            || false,
            &mut discarded,
        );
        let count = discarded.len();
        self.release_records(discarded);
        count
    }

    pub fn outstanding(&self) -> usize {
        self.tracking.lock_or_recover().outstanding.len()
    }

    /// Silences in the current error episode
    pub fn error_count(&self) -> u32 {
        self.escalation.count()
    }

    pub fn fault_count(&self) -> u32 {
        self.escalation.fault_count()
    }

    pub fn pending_stats(&self) -> PendingStats {
        self.pending.stats()
    }

    pub fn history(&self) -> Vec<Transaction> {
        self.history.snapshot()
    }

    pub fn commands(&self) -> &CommandQueue {
        &self.cmdq
    }

    pub fn responses(&self) -> &ResponseQueue {
        &self.rspq
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    pub fn address_map(&self) -> &AddressMap {
        &self.map
    }

    pub fn watchdog_armed(&self, ticket: &Ticket) -> bool {
        self.is_current(ticket) && self.watchdog.is_armed(ticket.id())
    }
}

impl Drop for IpcQueue {
    fn drop(&mut self) {
        self.detach();
        self.watchdog.disarm_all();
    }
}
