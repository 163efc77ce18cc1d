// Licensed under the Apache-2.0 license

//! OS Abstraction Layer (OSAL) for the coprocessor host stack
//!
//! Every blocking or time-dependent primitive used by the mailbox, queue and
//! session layers goes through this crate, so a port to another host OS only
//! has to replace the implementations here.

pub mod error;
pub mod sync;
pub mod thread;
pub mod time;

pub use error::{OsalError, OsalResult};
pub use sync::{AtomicBool, AtomicU32, Condvar, Mutex};
pub use thread::{ThreadBuilder, ThreadHandle};
pub use time::{Duration, Instant, StdTimer, Timer, TimerHandle};

/// Get OSAL version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
