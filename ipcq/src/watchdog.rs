// Licensed under the Apache-2.0 license

//! Per-dispatch watchdog
//!
//! Every armed dispatch id owns one osal timer. Disarming and expiry race for
//! the same map entry; whoever removes it wins, so a dispatch is either
//! completed or expired, never both.

use crate::error::IpcqResult;
use coproc_host_osal::{Duration, Mutex, Timer, TimerHandle};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone, Copy)]
struct Armed {
    generation: u64,
    handle: TimerHandle,
}

#[derive(Default)]
struct Table {
    generation: u64,
    armed: HashMap<u32, Armed>,
}

pub struct Watchdog {
    timer: Arc<dyn Timer>,
    table: Arc<Mutex<Table>>,
}

impl Watchdog {
    pub fn new(timer: Arc<dyn Timer>) -> Self {
        Self {
            timer,
            table: Arc::new(Mutex::new(Table::default())),
        }
    }

    /// Arm the watchdog for dispatch `id`. `on_expire` runs at most once, on
    /// the timer's thread, and only if nobody disarms `id` first. Re-arming
    /// an id replaces its previous timer.
    pub fn arm<F>(&self, id: u32, timeout: Duration, on_expire: F) -> IpcqResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // The table lock is held across scheduling so the callback cannot
        // look up `id` before it is recorded.
        let mut table = self.table.lock()?;
        if let Some(previous) = table.armed.remove(&id) {
            self.timer.cancel(previous.handle)?;
        }
        table.generation += 1;
        let generation = table.generation;

        let shared = Arc::clone(&self.table);
        let handle = self.timer.schedule_once(
            timeout,
            Box::new(move || {
                let won = {
                    let mut table = shared.lock_or_recover();
                    match table.armed.get(&id) {
                        Some(armed) if armed.generation == generation => {
                            table.armed.remove(&id);
                            true
                        }
                        _ => false,
                    }
                };
                if won {
                    on_expire();
                }
            }),
        )?;

        table.armed.insert(id, Armed { generation, handle });
        debug!("watchdog armed for dispatch {} ({:?})", id, timeout);
        Ok(())
    }

    /// Take `id` away from the timer. Returns `true` if this call won, i.e.
    /// the expiry callback has not run and now never will.
    pub fn claim(&self, id: u32) -> bool {
        let armed = self.table.lock_or_recover().armed.remove(&id);
        match armed {
            Some(armed) => {
                if let Err(e) = self.timer.cancel(armed.handle) {
                    warn!("watchdog cancel for dispatch {} failed: {}", id, e);
                }
                true
            }
            None => false,
        }
    }

    /// Disarm on a matching response
    pub fn disarm(&self, id: u32) -> bool {
        let won = self.claim(id);
        if won {
            debug!("watchdog disarmed for dispatch {}", id);
        }
        won
    }

    pub fn disarm_all(&self) -> usize {
        let drained: Vec<(u32, Armed)> = self.table.lock_or_recover().armed.drain().collect();
        for (id, armed) in &drained {
            if let Err(e) = self.timer.cancel(armed.handle) {
                warn!("watchdog cancel for dispatch {} failed: {}", id, e);
            }
        }
        drained.len()
    }

    pub fn is_armed(&self, id: u32) -> bool {
        self.table.lock_or_recover().armed.contains_key(&id)
    }

    pub fn armed_count(&self) -> usize {
        self.table.lock_or_recover().armed.len()
    }
}
