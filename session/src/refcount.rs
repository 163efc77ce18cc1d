// Licensed under the Apache-2.0 license

//! Reference count with side effects on its zero edges
//!
//! Increments and decrements away from the edges are plain atomics. The
//! 0→1 and 1→0 transitions take the transition lock and run the caller's
//! bring-up or tear-down while holding it, so nobody can observe a non-zero
//! count before bring-up finished or after tear-down started.

use crate::error::{SessionError, SessionResult};
use coproc_host_osal::{AtomicU32, Mutex};
use core::sync::atomic::Ordering;

#[derive(Debug, Default)]
pub struct RefCount {
    count: AtomicU32,
    transition: Mutex<()>,
}

impl RefCount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_held(&self) -> bool {
        self.get() != 0
    }

    fn increment_unless_zero(&self) -> bool {
        let mut current = self.count.load(Ordering::SeqCst);
        while current != 0 {
            match self.count.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    fn decrement_unless_last(&self) -> Option<bool> {
        let mut current = self.count.load(Ordering::SeqCst);
        loop {
            match current {
                0 => return None,
                1 => return Some(false),
                _ => match self.count.compare_exchange(
                    current,
                    current - 1,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                ) {
                    Ok(_) => return Some(true),
                    Err(actual) => current = actual,
                },
            }
        }
    }

    /// Take a reference, running `bring_up` on the 0→1 edge. A failed
    /// bring-up leaves the count at zero. Returns `true` on the edge.
    pub fn acquire_with<F>(&self, bring_up: F) -> SessionResult<bool>
    where
        F: FnOnce() -> SessionResult<()>,
    {
        if self.increment_unless_zero() {
            return Ok(false);
        }

        let _edge = self.transition.lock()?;
        if self.increment_unless_zero() {
            return Ok(false);
        }
        bring_up()?;
        self.count.store(1, Ordering::SeqCst);
        Ok(true)
    }

    /// Drop a reference, running `tear_down` on the 1→0 edge. Returns `true`
    /// on the edge.
    pub fn release_with<F>(&self, what: &'static str, tear_down: F) -> SessionResult<bool>
    where
        F: FnOnce(),
    {
        loop {
            match self.decrement_unless_last() {
                None => return Err(SessionError::NotHeld(what)),
                Some(true) => return Ok(false),
                Some(false) => {}
            }

            let _edge = self.transition.lock()?;
            // Publish zero first so concurrent acquirers queue on the lock
            if self
                .count
                .compare_exchange(1, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                tear_down();
                return Ok(true);
            }
        }
    }

    /// Drop every reference at once, running `tear_down` if any was held.
    /// Returns how many were dropped. Never fails.
    pub fn release_all_with<F>(&self, tear_down: F) -> u32
    where
        F: FnOnce(),
    {
        let _edge = self.transition.lock_or_recover();
        let dropped = self.count.swap(0, Ordering::SeqCst);
        if dropped != 0 {
            tear_down();
        }
        dropped
    }
}
