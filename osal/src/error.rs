// Licensed under the Apache-2.0 license

//! OSAL error type
use core::fmt;

pub type OsalResult<T> = Result<T, OsalError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OsalError {
    /// A lock or condition variable was poisoned by a panicking holder
    Poisoned,
    /// The host refused to start a worker thread
    Spawn(String),
    /// A worker thread panicked before it could be joined
    Join(String),
}

impl fmt::Display for OsalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsalError::Poisoned => write!(f, "lock poisoned"),
            OsalError::Spawn(name) => write!(f, "cannot start thread '{}'", name),
            OsalError::Join(name) => write!(f, "thread '{}' panicked", name),
        }
    }
}

impl std::error::Error for OsalError {}
