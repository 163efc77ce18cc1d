// Licensed under the Apache-2.0 license

//! Time and timer abstraction

use crate::error::OsalResult;
use crate::sync::{AtomicU32, Condvar, Mutex};
use crate::thread::ThreadBuilder;
use core::sync::atomic::Ordering;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::Arc;
use std::time as std_time;

lazy_static! {
    /// Process-wide origin for [`Instant`] readings.
    static ref EPOCH: std_time::Instant = std_time::Instant::now();
}

/// Duration with nanosecond resolution.
///
/// Held as a single `u64` of nanoseconds, so constructors saturate at
/// [`Duration::MAX`] (about 584 years) instead of overflowing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration {
    nanos: u64,
}

impl Duration {
    pub const ZERO: Duration = Duration { nanos: 0 };
    pub const MAX: Duration = Duration { nanos: u64::MAX };

    pub const fn new(secs: u64, nanos: u32) -> Self {
        Self {
            nanos: secs
                .saturating_mul(1_000_000_000)
                .saturating_add(nanos as u64),
        }
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self::new(secs, 0)
    }

    pub const fn from_millis(millis: u64) -> Self {
        Self::new(millis / 1000, ((millis % 1000) * 1_000_000) as u32)
    }

    pub const fn from_micros(micros: u64) -> Self {
        Self::new(micros / 1_000_000, ((micros % 1_000_000) * 1000) as u32)
    }

    pub const fn from_nanos(nanos: u64) -> Self {
        Self { nanos }
    }

    pub const fn as_secs(&self) -> u64 {
        self.nanos / 1_000_000_000
    }

    pub const fn as_millis(&self) -> u64 {
        self.nanos / 1_000_000
    }

    pub const fn as_micros(&self) -> u64 {
        self.nanos / 1000
    }

    pub const fn as_nanos(&self) -> u64 {
        self.nanos
    }

    pub const fn subsec_nanos(&self) -> u32 {
        (self.nanos % 1_000_000_000) as u32
    }

    pub const fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    pub const fn saturating_add(&self, other: Duration) -> Duration {
        Duration {
            nanos: self.nanos.saturating_add(other.nanos),
        }
    }

    pub const fn saturating_sub(&self, other: Duration) -> Duration {
        Duration {
            nanos: self.nanos.saturating_sub(other.nanos),
        }
    }
}

impl From<std_time::Duration> for Duration {
    fn from(std_dur: std_time::Duration) -> Self {
        Self::new(std_dur.as_secs(), std_dur.subsec_nanos())
    }
}

impl From<Duration> for std_time::Duration {
    fn from(dur: Duration) -> Self {
        std_time::Duration::new(dur.as_secs(), dur.subsec_nanos())
    }
}

/// Monotonic instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant {
    nanos: u64,
}

impl Instant {
    /// Get current time
    pub fn now() -> Self {
        Self {
            nanos: EPOCH.elapsed().as_nanos() as u64,
        }
    }

    /// Get duration since another instant
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        Duration::from_nanos(self.nanos.saturating_sub(earlier.nanos))
    }

    /// Get elapsed time since this instant
    pub fn elapsed(&self) -> Duration {
        Self::now().duration_since(*self)
    }

    /// Time left until this instant, zero once it has passed
    pub fn remaining(&self) -> Duration {
        self.duration_since(Self::now())
    }

    /// Add duration to instant
    pub fn checked_add(&self, duration: Duration) -> Option<Self> {
        self.nanos
            .checked_add(duration.as_nanos())
            .map(|nanos| Self { nanos })
    }

    /// Add duration to instant, clamping at the far future
    pub fn saturating_add(&self, duration: Duration) -> Self {
        Self {
            nanos: self.nanos.saturating_add(duration.as_nanos()),
        }
    }

    /// Subtract duration from instant
    pub fn checked_sub(&self, duration: Duration) -> Option<Self> {
        self.nanos
            .checked_sub(duration.as_nanos())
            .map(|nanos| Self { nanos })
    }
}

/// Timer trait for scheduling callbacks
pub trait Timer: Send + Sync {
    /// Schedule a one-shot timer
    fn schedule_once(
        &self,
        duration: Duration,
        callback: Box<dyn FnOnce() + Send>,
    ) -> OsalResult<TimerHandle>;

    /// Cancel a timer.
    ///
    /// Returns `true` when the callback was prevented from running, `false`
    /// when it already ran, is running, or the handle is unknown.
    fn cancel(&self, handle: TimerHandle) -> OsalResult<bool>;
}

/// Handle to a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Armed,
    Cancelled,
    Fired,
}

struct PendingTimer {
    state: Mutex<TimerState>,
    wake: Condvar,
}

/// Thread-backed timer with real cancellation
///
/// Each scheduled callback gets its own sleeper thread that waits on a
/// condition variable, so `cancel` wakes it immediately instead of letting it
/// run to the deadline.
pub struct StdTimer {
    next_handle: AtomicU32,
    timers: Arc<Mutex<HashMap<u32, Arc<PendingTimer>>>>,
}

impl Default for StdTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl StdTimer {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU32::new(1),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn next_handle(&self) -> TimerHandle {
        TimerHandle(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    /// Number of timers that have neither fired nor been cancelled
    pub fn armed(&self) -> usize {
        self.timers.lock_or_recover().len()
    }
}

impl Timer for StdTimer {
    fn schedule_once(
        &self,
        duration: Duration,
        callback: Box<dyn FnOnce() + Send>,
    ) -> OsalResult<TimerHandle> {
        let handle = self.next_handle();
        let pending = Arc::new(PendingTimer {
            state: Mutex::new(TimerState::Armed),
            wake: Condvar::new(),
        });
        self.timers.lock()?.insert(handle.0, Arc::clone(&pending));

        let timers = Arc::clone(&self.timers);
        let deadline = Instant::now().saturating_add(duration);
        let spawned = ThreadBuilder::new().name("osal-timer").spawn(move || {
            let mut state = pending.state.lock_or_recover();
            let fire = loop {
                if *state != TimerState::Armed {
                    break false;
                }
                let left = deadline.remaining();
                if left.is_zero() {
                    *state = TimerState::Fired;
                    break true;
                }
                match pending.wake.wait_timeout(state, left) {
                    Ok((guard, _)) => state = guard,
                    Err(_) => return,
                }
            };
            drop(state);
            timers.lock_or_recover().remove(&handle.0);
            if fire {
                callback();
            }
        });

        if let Err(err) = spawned {
            self.timers.lock_or_recover().remove(&handle.0);
            return Err(err);
        }
        Ok(handle)
    }

    fn cancel(&self, handle: TimerHandle) -> OsalResult<bool> {
        let pending = match self.timers.lock()?.remove(&handle.0) {
            Some(pending) => pending,
            None => return Ok(false),
        };
        let mut state = pending.state.lock()?;
        if *state != TimerState::Armed {
            return Ok(false);
        }
        *state = TimerState::Cancelled;
        pending.wake.notify_all();
        Ok(true)
    }
}

/// Sleep for specified duration
pub fn sleep(duration: Duration) -> OsalResult<()> {
    std::thread::sleep(duration.into());
    Ok(())
}

/// Busy-wait hint for short register polls
pub fn spin_hint() {
    core::hint::spin_loop();
}
