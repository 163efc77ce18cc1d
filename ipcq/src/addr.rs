// Licensed under the Apache-2.0 license

//! Translation between host offsets and coprocessor addresses
//!
//! The host addresses the shared window by byte offset. The coprocessor sees
//! the same bytes at `base + offset` in its own address space, and every
//! address crossing the mailbox must fit the 24-bit word payload.

use crate::error::{IpcqError, IpcqResult};
use coproc_host_mailbox::MailWord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressMap {
    base: u32,
    len: usize,
}

impl AddressMap {
    /// Window placed at the top of the coprocessor's `coproc_mem_size` bytes
    /// of memory, `shmem_size` bytes long, of which the host uses `len`.
    pub fn split(coproc_mem_size: u32, shmem_size: u32, len: usize) -> IpcqResult<Self> {
        let base = coproc_mem_size
            .checked_sub(shmem_size)
            .ok_or(IpcqError::AddressOutOfRange {
                addr: shmem_size as u64,
            })?;
        if len > shmem_size as usize {
            return Err(IpcqError::LayoutMismatch {
                expected: len,
                actual: shmem_size as usize,
            });
        }
        Self::with_base(base, len)
    }

    /// Both sides use the same offsets
    pub fn direct(len: usize) -> IpcqResult<Self> {
        Self::with_base(0, len)
    }

    fn with_base(base: u32, len: usize) -> IpcqResult<Self> {
        let end = base as u64 + len as u64;
        if end > MailWord::PAYLOAD_MASK as u64 + 1 {
            return Err(IpcqError::AddressOutOfRange { addr: end });
        }
        Ok(Self { base, len })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn to_coproc(&self, offset: usize) -> IpcqResult<u32> {
        if offset >= self.len {
            return Err(IpcqError::AddressOutOfRange {
                addr: offset as u64,
            });
        }
        Ok(self.base + offset as u32)
    }

    pub fn to_host(&self, addr: u32) -> IpcqResult<usize> {
        match addr.checked_sub(self.base) {
            Some(offset) if (offset as usize) < self.len => Ok(offset as usize),
            _ => Err(IpcqError::AddressOutOfRange { addr: addr as u64 }),
        }
    }
}
