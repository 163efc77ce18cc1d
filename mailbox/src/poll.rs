// Licensed under the Apache-2.0 license

//! Polling fallback for platforms without a usable mailbox interrupt

use crate::error::MailboxResult;
use crate::transport::Mailbox;
use coproc_host_osal::time::sleep;
use coproc_host_osal::{AtomicBool, Duration, ThreadBuilder, ThreadHandle};
use core::sync::atomic::Ordering;
use log::{debug, warn};
use std::sync::{Arc, Weak};

/// Background thread that calls [`Mailbox::handle_irq`] on a fixed period.
///
/// It only holds a weak reference, so dropping the last mailbox handle ends
/// the thread at its next tick.
pub(crate) struct Poller {
    stop: Arc<AtomicBool>,
    handle: Option<ThreadHandle>,
}

impl Poller {
    pub(crate) fn spawn(mailbox: Weak<Mailbox>, interval: Duration) -> MailboxResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);

        let handle = ThreadBuilder::new()
            .name("mailbox-poll")
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    match mailbox.upgrade() {
                        Some(mailbox) => {
                            let delivered = mailbox.handle_irq();
                            if delivered > 0 {
                                debug!("mailbox poll delivered {} word(s)", delivered);
                            }
                        }
                        None => break,
                    }
                    if sleep(interval).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Stop the thread and wait for it to exit.
    pub(crate) fn shutdown(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.join() {
                warn!("mailbox poll thread did not exit cleanly: {}", e);
            }
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}
