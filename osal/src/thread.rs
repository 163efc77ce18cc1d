// Licensed under the Apache-2.0 license

//! Named worker threads
//!
//! The stack runs a handful of long-lived helpers (mailbox poller, watchdog
//! timers, emulated firmware). Each one is named so panics and log lines can
//! be traced back to it.

use crate::error::{OsalError, OsalResult};
use std::thread as std_thread;

/// Joinable handle to a worker started with [`ThreadBuilder::spawn`]
pub struct ThreadHandle {
    name: String,
    inner: std_thread::JoinHandle<()>,
}

impl ThreadHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the worker to return. A panic inside it surfaces as
    /// [`OsalError::Join`].
    pub fn join(self) -> OsalResult<()> {
        let ThreadHandle { name, inner } = self;
        inner.join().map_err(|_| OsalError::Join(name))
    }

    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

pub struct ThreadBuilder {
    name: String,
    stack_size: Option<usize>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self {
            name: String::from("coproc-worker"),
            stack_size: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    pub fn spawn<F>(self, f: F) -> OsalResult<ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut builder = std_thread::Builder::new().name(self.name.clone());
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }

        match builder.spawn(f) {
            Ok(inner) => Ok(ThreadHandle {
                name: self.name,
                inner,
            }),
            Err(_) => Err(OsalError::Spawn(self.name)),
        }
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn yield_now() {
    std_thread::yield_now();
}
