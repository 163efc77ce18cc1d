// Licensed under the Apache-2.0 license

use crate::error::{MailboxError, MailboxResult};
use bitfield::bitfield;

/// Message class tags carried in the top byte of every mail word.
pub mod class {
    /// Response notifications; the payload is a response slot address
    pub const DEFAULT: u8 = 0x00;
    /// Platform/system messages
    pub const SYSTEM: u8 = 0xC0;
    /// Command/response queue flow control
    pub const IPCQ_CTRL: u8 = 0xC1;
}

bitfield! {
    /// One 32-bit mailbox word.
    /// Bits 31:24: class tag used to route the word to listeners
    /// Bits 23:0: class-specific payload
    #[derive(Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct MailWord(u32);
    impl Debug;
    pub u8, class, set_class: 31, 24;
    pub u32, payload, set_payload: 23, 0;
}

impl MailWord {
    pub const PAYLOAD_MASK: u32 = 0x00ff_ffff;

    /// Coprocessor → host: no free response slot, waiting for room
    pub const RSP_QUEUE_FULL: MailWord = MailWord(0xC100_0001);
    /// Host → coprocessor: a response slot was released
    pub const RSP_QUEUE_FREE: MailWord = MailWord(0xC100_0002);

    pub const fn from_raw(raw: u32) -> Self {
        MailWord(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn new(class: u8, payload: u32) -> MailboxResult<Self> {
        if payload & !Self::PAYLOAD_MASK != 0 {
            return Err(MailboxError::PayloadTooLarge(payload));
        }
        let mut word = MailWord(0);
        word.set_class(class);
        word.set_payload(payload);
        Ok(word)
    }
}

impl From<MailWord> for u32 {
    fn from(word: MailWord) -> Self {
        word.0
    }
}
