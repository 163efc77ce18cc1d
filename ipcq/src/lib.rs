// Licensed under the Apache-2.0 license

//! Coprocessor IPC Queue
//!
//! Command/response transport over a shared-memory window and the mailbox:
//!
//! - [`layout`]: bit-exact slot arrays shared with the firmware
//! - [`cmdq`]: chained command slot allocation and release
//! - [`rspq`]: response slot resolution, release and flow control
//! - [`pending`]: hand-off of received mail to blocked waiters
//! - [`watchdog`] and [`escalation`]: coprocessor silence handling
//! - [`queue`]: the [`IpcQueue`] facade used by sessions
//!
//! ```text
//!  send(cmd) ─► CommandQueue::allocate ─► write ─► Mailbox::post(head addr)
//!                                                        │
//!                                                   coprocessor
//!                                                        │
//!  wait(ticket) ◄─ PendingPool ◄─ DEFAULT listener ◄─ response mail
//!        ▲
//!        └──── Watchdog expiry injects a TimeoutNotify response
//! ```

pub mod addr;
pub mod cmdq;
pub mod command;
pub mod error;
pub mod escalation;
pub mod layout;
pub mod pending;
pub mod queue;
pub mod rspq;
pub mod shmem;
pub mod trace;
pub mod watchdog;

pub use addr::AddressMap;
pub use cmdq::{AllocPolicy, Chain, CommandQueue};
pub use command::{Command, Completion, CompletionKind, Ticket};
pub use error::{ErrorClass, IpcqError, IpcqResult};
pub use escalation::{ErrorEpisode, ErrorEscalation, HardwareFault, LogSupervisor, Supervisor};
pub use layout::{CmdParam, CmdType, HostCtrlSub, IpcFunc, IpcHeader, RspParam};
pub use pending::{Mail, PendingConfig, PendingStats};
pub use queue::{IpcQueue, IpcqConfig};
pub use rspq::{Response, ResponseQueue};
pub use shmem::{HeapRegion, SharedRegion};
pub use trace::{Direction, Transaction};
pub use watchdog::Watchdog;
