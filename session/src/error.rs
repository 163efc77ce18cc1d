// Licensed under the Apache-2.0 license

use crate::hal::HalError;
use coproc_host_ipcq::IpcqError;
use coproc_host_mailbox::MailboxError;
use coproc_host_osal::OsalError;
use thiserror::Error;

/// Session result type
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session limit of {max} reached")]
    TooManySessions { max: usize },

    #[error("session {0} is detached")]
    Detached(u32),

    #[error("coprocessor is not powered for this session")]
    NotPowered,

    #[error("coprocessor firmware is not running")]
    NotBooted,

    /// Power may only be released after boot has been released
    #[error("boot reference still held")]
    BootHeld,

    /// Release without a matching acquire
    #[error("no {0} reference held")]
    NotHeld(&'static str),

    #[error("firmware image not present")]
    FirmwareMissing,

    #[error(transparent)]
    Hal(#[from] HalError),

    #[error(transparent)]
    Ipcq(#[from] IpcqError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error(transparent)]
    Osal(#[from] OsalError),
}
