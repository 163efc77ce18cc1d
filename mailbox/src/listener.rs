// Licensed under the Apache-2.0 license

//! Prioritized listener chain
//!
//! Delivery runs in interrupt-equivalent context, so it only clones the
//! current immutable snapshot under a spin read lock and runs listeners with
//! no lock held. Registration builds a new list and swaps it in; writers
//! serialize among themselves with an ordinary mutex that the delivery path
//! never touches.

use crate::word::MailWord;
use coproc_host_osal::{AtomicU32, Mutex, OsalResult};
use core::sync::atomic::Ordering;
use log::debug;
use spin::RwLock;
use std::sync::Arc;

/// Outcome reported by a listener for one word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The word is fully handled; lower-priority listeners are skipped
    Handled,
    /// Keep offering the word down the chain
    Pass,
}

/// Receiver of mailbox words for one class tag.
///
/// Called from interrupt-equivalent context: implementations must not block.
pub trait MailListener: Send + Sync {
    fn on_mail(&self, word: MailWord) -> Delivery;
}

impl<F> MailListener for F
where
    F: Fn(MailWord) -> Delivery + Send + Sync,
{
    fn on_mail(&self, word: MailWord) -> Delivery {
        self(word)
    }
}

/// Registration handle returned by [`ListenerChain::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u32);

#[derive(Clone)]
struct Entry {
    id: ListenerId,
    class: u8,
    priority: u8,
    listener: Arc<dyn MailListener>,
}

pub struct ListenerChain {
    snapshot: RwLock<Arc<Vec<Entry>>>,
    writer: Mutex<()>,
    next_id: AtomicU32,
}

impl Default for ListenerChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerChain {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Vec::new())),
            writer: Mutex::new(()),
            next_id: AtomicU32::new(1),
        }
    }

    /// Add a listener for `class`. Higher `priority` runs first; equal
    /// priorities run in registration order.
    pub fn register(
        &self,
        class: u8,
        priority: u8,
        listener: Arc<dyn MailListener>,
    ) -> OsalResult<ListenerId> {
        let _writer = self.writer.lock()?;
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));

        let mut next: Vec<Entry> = Vec::clone(&self.load());
        let at = next
            .iter()
            .position(|e| e.priority < priority)
            .unwrap_or(next.len());
        next.insert(
            at,
            Entry {
                id,
                class,
                priority,
                listener,
            },
        );
        self.publish(next);

        debug!(
            "mailbox listener {:?} registered for class 0x{:02x} prio {}",
            id, class, priority
        );
        Ok(id)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> OsalResult<bool> {
        let _writer = self.writer.lock()?;
        let current = self.load();
        if !current.iter().any(|e| e.id == id) {
            return Ok(false);
        }
        let next: Vec<Entry> = current.iter().filter(|e| e.id != id).cloned().collect();
        self.publish(next);
        debug!("mailbox listener {:?} unregistered", id);
        Ok(true)
    }

    /// Offer `word` to every listener of its class. Returns `true` if one of
    /// them claimed it.
    pub fn dispatch(&self, word: MailWord) -> bool {
        let entries = self.load();
        let class = word.class();
        entries
            .iter()
            .filter(|e| e.class == class)
            .any(|e| e.listener.on_mail(word) == Delivery::Handled)
    }

    fn load(&self) -> Arc<Vec<Entry>> {
        Arc::clone(&self.snapshot.read())
    }

    fn publish(&self, next: Vec<Entry>) {
        *self.snapshot.write() = Arc::new(next);
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
