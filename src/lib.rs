// Licensed under the Apache-2.0 license

//! Coprocessor Host Library
//!
//! Host-side plumbing for a coprocessor attached through a mailbox register
//! block and a shared-memory window:
//!
//! - **osal**: threads, locks, clocks and timers behind one small API
//! - **mailbox**: 32-bit word transport with classed, prioritised listeners
//! - **ipcq**: chained command slots, response slots, waiters and watchdog
//! - **session**: reference-counted power and boot, per-client sessions
//! - **config**: TOML configuration for the whole stack
//!
//! ## Architecture Overview
//!
//! ```text
//!     ┌─────────────────┐    ┌─────────────────┐
//!     │ Session         │    │ coproc-host-    │
//!     │ (per client)    │    │ config          │
//!     └─────────────────┘    └─────────────────┘
//!              │
//!     ┌─────────────────┐         ┌─────────────────┐
//!     │ Coprocessor     │◄────────│ PowerControl    │
//!     │ (power / boot)  │◄────────│ FirmwareLoader  │
//!     └─────────────────┘         └─────────────────┘
//!              │
//!     ┌─────────────────┐         ┌─────────────────┐
//!     │ IpcQueue        │◄────────│ SharedRegion    │
//!     │ (cmd / rsp)     │         │ (shared window) │
//!     └─────────────────┘         └─────────────────┘
//!              │
//!     ┌─────────────────┐         ┌─────────────────┐
//!     │ Mailbox         │◄────────│ MailboxRegisters│
//!     └─────────────────┘         └─────────────────┘
//!              │
//!     ┌─────────────────┐
//!     │ coproc-host-osal│
//!     └─────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use coproc_host::{
//!     Command, CmdType, Coprocessor, CoprocConfig, FirmwareImage, IpcFunc, IpcQueue,
//!     LogSupervisor, Mailbox,
//! };
//!
//! let config = CoprocConfig::load_default()?;
//! let mailbox = Mailbox::new(registers, config.mailbox_config());
//! let ipcq = IpcQueue::new(
//!     mailbox,
//!     region,
//!     config.address_map()?,
//!     config.ipcq_config(),
//!     Arc::new(LogSupervisor),
//! )?;
//! let device = Coprocessor::new(power, loader, ipcq, config.device_config());
//!
//! let session = device.open_session()?;
//! session.acquire_power()?;
//! session.acquire_boot(&FirmwareImage::new("fw.bin", image))?;
//! let done = session.execute(
//!     &Command::new(IpcFunc::Generic, CmdType::Generic).with_params(&[1, 2]),
//!     Duration::from_millis(500),
//! )?;
//! ```

pub use coproc_host_config as config;
pub use coproc_host_ipcq as ipcq;
pub use coproc_host_mailbox as mailbox;
pub use coproc_host_osal as osal;
pub use coproc_host_session as session;

// Re-export main public APIs for convenience
pub use coproc_host_config::CoprocConfig;
pub use coproc_host_ipcq::{
    AddressMap, CmdType, Command, Completion, CompletionKind, HeapRegion, IpcFunc, IpcQueue,
    IpcqConfig, LogSupervisor, SharedRegion, Supervisor, Ticket,
};
pub use coproc_host_mailbox::{Mailbox, MailboxConfig, MailboxRegisters};
pub use coproc_host_osal::Duration;
pub use coproc_host_session::{
    Coprocessor, DeviceConfig, FirmwareImage, FirmwareLoader, PowerControl, Session,
};

// Re-export error types
pub use coproc_host_ipcq::IpcqError;
pub use coproc_host_mailbox::MailboxError;
pub use coproc_host_session::SessionError;
