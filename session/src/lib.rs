// Licensed under the Apache-2.0 license

//! Session Management
//!
//! Power and boot lifecycle of the coprocessor, shared by any number of
//! client sessions. Each session keeps its own reference counts and holds
//! at most one reference on each device-wide count, so a detached session
//! can always give back exactly what it took.

pub mod device;
pub mod error;
pub mod hal;
pub mod refcount;
pub mod session;

pub use device::{Coprocessor, DeviceConfig, DeviceState, DeviceStatus};
pub use error::{SessionError, SessionResult};
pub use hal::{FirmwareImage, FirmwareLoader, HalError, HalResult, PowerControl, ReadyToken};
pub use refcount::RefCount;
pub use session::{Session, SessionInfo, SessionStatistics};
