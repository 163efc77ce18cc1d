// Licensed under the Apache-2.0 license

//! Coprocessor Mailbox Transport
//!
//! Wraps the narrow register channel between host and coprocessor. Outbound,
//! [`Mailbox::post`] pushes one 32-bit word with a bounded retry budget.
//! Inbound, [`Mailbox::on_receive`] pulls one word and hands it to the
//! listeners registered for its class tag, highest priority first.
//!
//! ```text
//!   host thread ── post(word) ──► MailboxRegisters ──► coprocessor
//!
//!   coprocessor ──► MailboxRegisters ── irq / poll ──► on_receive()
//!                                                         │
//!                                        ListenerChain snapshot (class, prio)
//!                                                         │
//!                                          listener A ─► listener B ─► ...
//! ```

pub mod error;
pub mod listener;
pub mod poll;
pub mod regs;
pub mod transport;
pub mod word;

pub use error::{MailboxError, MailboxResult};
pub use listener::{Delivery, ListenerChain, ListenerId, MailListener};
pub use regs::MailboxRegisters;
pub use transport::{DeliveryMode, Mailbox, MailboxConfig, MailboxStats, Receipt};
pub use word::{class, MailWord};
