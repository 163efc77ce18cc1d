// Licensed under the Apache-2.0 license

//! Synchronization primitives abstraction

use crate::error::{OsalError, OsalResult};
use crate::time::Duration;
use core::sync::atomic::Ordering;
use std::sync as std_sync;

pub use std_sync::MutexGuard;

/// Mutex abstraction
///
/// Lock poisoning is reported as [`OsalError::Poisoned`] instead of
/// panicking the caller.
#[derive(Debug, Default)]
pub struct Mutex<T> {
    inner: std_sync::Mutex<T>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: std_sync::Mutex::new(value),
        }
    }

    pub fn lock(&self) -> OsalResult<MutexGuard<'_, T>> {
        self.inner
            .lock()
            .map_err(|_| OsalError::Poisoned)
    }

    /// Lock even if a previous holder panicked.
    ///
    /// Only used on teardown paths that must never fail.
    pub fn lock_or_recover(&self) -> MutexGuard<'_, T> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn into_inner(self) -> OsalResult<T> {
        self.inner
            .into_inner()
            .map_err(|_| OsalError::Poisoned)
    }
}

/// Condition variable abstraction
#[derive(Debug, Default)]
pub struct Condvar {
    inner: std_sync::Condvar,
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            inner: std_sync::Condvar::new(),
        }
    }

    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> OsalResult<MutexGuard<'a, T>> {
        self.inner
            .wait(guard)
            .map_err(|_| OsalError::Poisoned)
    }

    /// Wait for a notification or until `timeout` elapses.
    ///
    /// The returned flag is `true` when the wait timed out.
    pub fn wait_timeout<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        timeout: Duration,
    ) -> OsalResult<(MutexGuard<'a, T>, bool)> {
        self.inner
            .wait_timeout(guard, timeout.into())
            .map(|(guard, result)| (guard, result.timed_out()))
            .map_err(|_| OsalError::Poisoned)
    }

    pub fn notify_one(&self) {
        self.inner.notify_one();
    }

    pub fn notify_all(&self) {
        self.inner.notify_all();
    }
}

/// Atomic u32
#[derive(Debug, Default)]
pub struct AtomicU32 {
    inner: core::sync::atomic::AtomicU32,
}

impl AtomicU32 {
    pub const fn new(value: u32) -> Self {
        Self {
            inner: core::sync::atomic::AtomicU32::new(value),
        }
    }

    pub fn load(&self, ordering: Ordering) -> u32 {
        self.inner.load(ordering)
    }

    pub fn store(&self, value: u32, ordering: Ordering) {
        self.inner.store(value, ordering);
    }

    pub fn swap(&self, value: u32, ordering: Ordering) -> u32 {
        self.inner.swap(value, ordering)
    }

    pub fn fetch_add(&self, value: u32, ordering: Ordering) -> u32 {
        self.inner.fetch_add(value, ordering)
    }

    pub fn fetch_sub(&self, value: u32, ordering: Ordering) -> u32 {
        self.inner.fetch_sub(value, ordering)
    }

    pub fn compare_exchange(
        &self,
        current: u32,
        new: u32,
        success: Ordering,
        failure: Ordering,
    ) -> Result<u32, u32> {
        self.inner.compare_exchange(current, new, success, failure)
    }
}

/// Atomic bool
#[derive(Debug, Default)]
pub struct AtomicBool {
    inner: core::sync::atomic::AtomicBool,
}

impl AtomicBool {
    pub const fn new(value: bool) -> Self {
        Self {
            inner: core::sync::atomic::AtomicBool::new(value),
        }
    }

    pub fn load(&self, ordering: Ordering) -> bool {
        self.inner.load(ordering)
    }

    pub fn store(&self, value: bool, ordering: Ordering) {
        self.inner.store(value, ordering);
    }

    pub fn swap(&self, value: bool, ordering: Ordering) -> bool {
        self.inner.swap(value, ordering)
    }

    pub fn compare_exchange(
        &self,
        current: bool,
        new: bool,
        success: Ordering,
        failure: Ordering,
    ) -> Result<bool, bool> {
        self.inner.compare_exchange(current, new, success, failure)
    }
}
