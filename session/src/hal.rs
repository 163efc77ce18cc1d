// Licensed under the Apache-2.0 license

//! Collaborators driven at lifecycle edges
//!
//! Neither trait is called outside a 0↔1 transition of the device-wide
//! reference counts.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{component}: {reason}")]
pub struct HalError {
    pub component: &'static str,
    pub reason: String,
}

impl HalError {
    pub fn new(component: &'static str, reason: impl Into<String>) -> Self {
        Self {
            component,
            reason: reason.into(),
        }
    }
}

pub type HalResult<T> = Result<T, HalError>;

/// Power, clock and reset sequencing of the coprocessor
pub trait PowerControl: Send + Sync {
    fn power_on(&self) -> HalResult<()>;

    fn power_off(&self) -> HalResult<()>;

    fn reset_assert(&self) -> HalResult<()>;

    fn reset_release(&self) -> HalResult<()>;

    /// A firmware image is resident and can be started
    fn firmware_present(&self) -> bool;
}

/// Opaque firmware image handed to the loader
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirmwareImage {
    pub name: String,
    pub data: Vec<u8>,
}

impl FirmwareImage {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Proof that firmware was started; given back to stop it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReadyToken(pub u64);

pub trait FirmwareLoader: Send + Sync {
    fn load_and_start(&self, image: &FirmwareImage) -> HalResult<ReadyToken>;

    fn stop(&self, token: ReadyToken) -> HalResult<()>;
}
