// Licensed under the Apache-2.0 license

//! Mailbox transport
//!
//! Owns the register seam, the listener chain and the delivery mode. The
//! inbound path never takes a blocking lock: a try-flag keeps a single
//! context draining the register, and the listener chain is a snapshot.

use crate::error::{MailboxError, MailboxResult};
use crate::listener::{ListenerChain, ListenerId, MailListener};
use crate::poll::Poller;
use crate::regs::MailboxRegisters;
use crate::word::MailWord;
use coproc_host_osal::time::{sleep, spin_hint};
use coproc_host_osal::{AtomicBool, AtomicU32, Duration, Mutex};
use core::sync::atomic::Ordering;
use log::{debug, info, warn};
use std::sync::Arc;

/// How inbound words reach [`Mailbox::on_receive`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// The platform wires the inbound interrupt to [`Mailbox::handle_irq`]
    Interrupt,
    /// A background thread drains the register every `interval`
    Polled { interval: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxConfig {
    pub mode: DeliveryMode,
    /// Busy-polls of the outbound-full bit before falling back to sleeping
    pub post_spin_polls: u32,
    /// Sleep-and-retry rounds after the spin budget is spent
    pub post_sleep_retries: u32,
    pub post_retry_interval: Duration,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            mode: DeliveryMode::Interrupt,
            post_spin_polls: 64,
            post_sleep_retries: 50,
            post_retry_interval: Duration::from_micros(200),
        }
    }
}

/// Result of pulling one inbound word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub word: MailWord,
    /// A listener claimed the word
    pub handled: bool,
}

/// Point-in-time copy of the transport counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MailboxStats {
    pub posted: u32,
    pub received: u32,
    pub unclaimed: u32,
    pub post_retries: u32,
    pub post_failures: u32,
}

#[derive(Default)]
struct Counters {
    posted: AtomicU32,
    received: AtomicU32,
    unclaimed: AtomicU32,
    post_retries: AtomicU32,
    post_failures: AtomicU32,
}

impl Counters {
    fn bump(counter: &AtomicU32) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> MailboxStats {
        MailboxStats {
            posted: self.posted.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            unclaimed: self.unclaimed.load(Ordering::Relaxed),
            post_retries: self.post_retries.load(Ordering::Relaxed),
            post_failures: self.post_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct Mailbox {
    regs: Arc<dyn MailboxRegisters>,
    config: MailboxConfig,
    listeners: ListenerChain,
    post_lock: Mutex<()>,
    receiving: AtomicBool,
    running: AtomicBool,
    poller: Mutex<Option<Poller>>,
    counters: Counters,
}

impl Mailbox {
    pub fn new(regs: Arc<dyn MailboxRegisters>, config: MailboxConfig) -> Arc<Self> {
        Arc::new(Self {
            regs,
            config,
            listeners: ListenerChain::new(),
            post_lock: Mutex::new(()),
            receiving: AtomicBool::new(false),
            running: AtomicBool::new(false),
            poller: Mutex::new(None),
            counters: Counters::default(),
        })
    }

    pub fn config(&self) -> &MailboxConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Begin delivering inbound words. Calling it on a running mailbox is a
    /// no-op.
    pub fn start(self: &Arc<Self>) -> MailboxResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        match self.config.mode {
            DeliveryMode::Interrupt => {
                self.regs.set_interrupt_enabled(true);
                // Words latched before the line was unmasked raise no edge
                self.handle_irq();
            }
            DeliveryMode::Polled { interval } => {
                match Poller::spawn(Arc::downgrade(self), interval) {
                    Ok(poller) => *self.poller.lock_or_recover() = Some(poller),
                    Err(e) => {
                        self.running.store(false, Ordering::SeqCst);
                        return Err(e);
                    }
                }
            }
        }

        info!("mailbox started ({:?})", self.config.mode);
        Ok(())
    }

    /// Stop delivery. Idempotent; never fails.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.regs.set_interrupt_enabled(false);
        if let Some(poller) = self.poller.lock_or_recover().take() {
            poller.shutdown();
        }
        info!("mailbox stopped");
    }

    pub fn register_listener(
        &self,
        class: u8,
        priority: u8,
        listener: Arc<dyn MailListener>,
    ) -> MailboxResult<ListenerId> {
        Ok(self.listeners.register(class, priority, listener)?)
    }

    pub fn unregister_listener(&self, id: ListenerId) -> MailboxResult<bool> {
        Ok(self.listeners.unregister(id)?)
    }

    /// Write one word to the coprocessor.
    ///
    /// Spins on the outbound-full bit, then sleeps between retries, then
    /// gives up with [`MailboxError::Busy`]. The register is always checked
    /// at least once, whatever the retry settings.
    pub fn post(&self, word: MailWord) -> MailboxResult<()> {
        if !self.is_running() {
            return Err(MailboxError::NotStarted);
        }

        let _post = self.post_lock.lock()?;
        let spins = self.config.post_spin_polls.max(1);

        for _ in 0..spins {
            if !self.regs.outbound_full() {
                self.write(word);
                return Ok(());
            }
            spin_hint();
        }

        for _ in 0..self.config.post_sleep_retries {
            Counters::bump(&self.counters.post_retries);
            sleep(self.config.post_retry_interval)?;
            if !self.regs.outbound_full() {
                self.write(word);
                return Ok(());
            }
        }

        let attempts = spins.saturating_add(self.config.post_sleep_retries);
        Counters::bump(&self.counters.post_failures);
        warn!(
            "mailbox post of 0x{:08x} failed: inbox full after {} attempts",
            word.raw(),
            attempts
        );
        Err(MailboxError::Busy { attempts })
    }

    fn write(&self, word: MailWord) {
        self.regs.write_outbound(word.raw());
        Counters::bump(&self.counters.posted);
        debug!("mailbox post 0x{:08x}", word.raw());
    }

    /// Pull one pending word and dispatch it. Returns `None` when nothing is
    /// pending or another context is already draining.
    pub fn on_receive(&self) -> Option<Receipt> {
        if !self.begin_receive() {
            return None;
        }
        let receipt = self.receive_one();
        self.receiving.store(false, Ordering::Release);
        receipt
    }

    /// Interrupt handler body: drain every pending word. Returns how many
    /// words were delivered by this call.
    pub fn handle_irq(&self) -> usize {
        let mut delivered = 0;
        loop {
            if !self.begin_receive() {
                return delivered;
            }
            while self.receive_one().is_some() {
                delivered += 1;
            }
            self.receiving.store(false, Ordering::Release);

            // A word may land between the last empty read and the flag
            // release while a competing context backed off.
            if !self.regs.inbound_pending() {
                return delivered;
            }
        }
    }

    fn begin_receive(&self) -> bool {
        self.receiving
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn receive_one(&self) -> Option<Receipt> {
        if !self.regs.inbound_pending() {
            return None;
        }
        let word = MailWord::from_raw(self.regs.read_inbound());
        self.regs.clear_inbound_pending();
        Counters::bump(&self.counters.received);

        let handled = self.listeners.dispatch(word);
        if !handled {
            Counters::bump(&self.counters.unclaimed);
            warn!(
                "mailbox word 0x{:08x} (class 0x{:02x}) not claimed by any listener",
                word.raw(),
                word.class()
            );
        }
        Some(Receipt { word, handled })
    }

    pub fn stats(&self) -> MailboxStats {
        self.counters.snapshot()
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.regs.set_interrupt_enabled(false);
        }
    }
}
