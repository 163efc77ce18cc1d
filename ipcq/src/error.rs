// Licensed under the Apache-2.0 license

//! Queue error types

use coproc_host_mailbox::MailboxError;
use coproc_host_osal::OsalError;
use thiserror::Error;

pub type IpcqResult<T> = Result<T, IpcqError>;

/// Broad failure categories a caller can act on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// No slot, record or mailbox room within the retry budget; retry later
    ResourceExhaustion,
    /// Host-side programming defect; the operation was rejected unchanged
    ProtocolViolation,
    /// The coprocessor did not answer in time
    CoprocessorSilence,
    /// The accelerator side reported corruption-class trouble
    HardwareFault,
    /// The queue or device is not in a state that allows the operation
    Lifecycle,
    /// The waiter was abandoned
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpcqError {
    #[error("command queue is not active")]
    NotActive,

    #[error("chain of {requested} slots is invalid (max {max})")]
    InvalidChainLength { requested: usize, max: usize },

    #[error("no free command slot after {attempts} attempts")]
    NoFreeSlot { attempts: u32 },

    #[error("pending pool exhausted ({limit} overflow records in use)")]
    PendingExhausted { limit: usize },

    #[error("command slot {slot} is already free")]
    AlreadyFree { slot: usize },

    #[error("command slot {slot} has a corrupt chain")]
    CorruptChain { slot: usize },

    #[error("slot index {slot} out of range")]
    BadSlot { slot: usize },

    #[error("address 0x{addr:08x} outside the shared window")]
    AddressOutOfRange { addr: u64 },

    #[error("shared region is {actual} bytes, layout needs {expected}")]
    LayoutMismatch { expected: usize, actual: usize },

    #[error("no response within the wait deadline")]
    Timeout,

    #[error("wait was cancelled")]
    Cancelled,

    #[error("unknown dispatch id {0}")]
    UnknownTicket(u32),

    #[error("host control sub-function 0x{0:02x} is not supported")]
    UnsupportedControl(u8),

    #[error("response queue is not open")]
    Closed,

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    Osal(#[from] OsalError),
}

impl IpcqError {
    pub fn class(&self) -> ErrorClass {
        match self {
            IpcqError::NoFreeSlot { .. } | IpcqError::PendingExhausted { .. } => {
                ErrorClass::ResourceExhaustion
            }
            IpcqError::Mailbox(e) if e.is_retryable() => ErrorClass::ResourceExhaustion,
            IpcqError::InvalidChainLength { .. }
            | IpcqError::AlreadyFree { .. }
            | IpcqError::CorruptChain { .. }
            | IpcqError::BadSlot { .. }
            | IpcqError::UnknownTicket(_)
            | IpcqError::UnsupportedControl(_) => ErrorClass::ProtocolViolation,
            IpcqError::AddressOutOfRange { .. } => ErrorClass::HardwareFault,
            IpcqError::Timeout => ErrorClass::CoprocessorSilence,
            IpcqError::Cancelled => ErrorClass::Cancelled,
            IpcqError::NotActive
            | IpcqError::Closed
            | IpcqError::LayoutMismatch { .. }
            | IpcqError::Mailbox(_)
            | IpcqError::Osal(_) => ErrorClass::Lifecycle,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::ResourceExhaustion
    }
}
