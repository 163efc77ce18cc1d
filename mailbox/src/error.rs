// Licensed under the Apache-2.0 license

//! Mailbox error types

use coproc_host_osal::OsalError;
use thiserror::Error;

pub type MailboxResult<T> = Result<T, MailboxError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailboxError {
    /// The coprocessor's inbound queue stayed full for the whole retry budget
    #[error("coprocessor inbox still full after {attempts} attempts")]
    Busy { attempts: u32 },

    /// The mailbox has not been started or was stopped
    #[error("mailbox is not started")]
    NotStarted,

    /// Word does not fit the class/payload split
    #[error("payload 0x{0:08x} does not fit in a mail word")]
    PayloadTooLarge(u32),

    #[error(transparent)]
    Osal(#[from] OsalError),
}

impl MailboxError {
    /// Resource exhaustion is the only condition worth retrying later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MailboxError::Busy { .. })
    }
}
