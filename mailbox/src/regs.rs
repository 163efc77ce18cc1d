// Licensed under the Apache-2.0 license

//! Register-level seam between the transport and the mailbox hardware

/// Raw mailbox register access.
///
/// Implementations must be callable from interrupt-equivalent context: no
/// method may block.
pub trait MailboxRegisters: Send + Sync {
    /// The coprocessor's inbound queue cannot take another word
    fn outbound_full(&self) -> bool;

    /// Write a word into the host-to-coprocessor register and ring the doorbell
    fn write_outbound(&self, word: u32);

    /// A coprocessor-to-host word is waiting
    fn inbound_pending(&self) -> bool;

    /// Read the current coprocessor-to-host word without acknowledging it
    fn read_inbound(&self) -> u32;

    /// Acknowledge the current inbound word, clearing the pending bit
    fn clear_inbound_pending(&self);

    /// Mask or unmask the inbound interrupt line
    fn set_interrupt_enabled(&self, enabled: bool);
}
