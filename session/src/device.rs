// Licensed under the Apache-2.0 license

//! Device-wide lifecycle shared by every session

use crate::error::{SessionError, SessionResult};
use crate::hal::{FirmwareImage, FirmwareLoader, PowerControl, ReadyToken};
use crate::refcount::RefCount;
use crate::session::Session;
use coproc_host_ipcq::IpcQueue;
use coproc_host_mailbox::Mailbox;
use coproc_host_osal::{AtomicU32, Mutex};
use core::sync::atomic::Ordering;
use log::{error, info, warn};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::sync::Arc;

/// Coprocessor lifecycle state
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum DeviceState {
    Off = 0,
    PoweringUp = 1,
    Powered = 2,
    Booting = 3,
    Ready = 4,
    ShuttingDown = 5,
    PoweringDown = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub max_sessions: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { max_sessions: 8 }
    }
}

/// Snapshot returned by [`Coprocessor::status`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceStatus {
    pub state: DeviceState,
    /// Sessions currently holding power
    pub power_refs: u32,
    /// Sessions currently holding boot
    pub boot_refs: u32,
    pub sessions: u32,
    pub error_count: u32,
    pub outstanding: usize,
}

/// The one coprocessor instance. Its two counters count sessions, not
/// individual acquisitions: a session contributes one reference while its
/// own counter is non-zero.
pub struct Coprocessor {
    power: Arc<dyn PowerControl>,
    loader: Arc<dyn FirmwareLoader>,
    mailbox: Arc<Mailbox>,
    ipcq: Arc<IpcQueue>,
    config: DeviceConfig,
    powered: RefCount,
    booted: RefCount,
    state: AtomicU32,
    ready: Mutex<Option<ReadyToken>>,
    sessions: AtomicU32,
    next_session_id: AtomicU32,
}

impl Coprocessor {
    pub fn new(
        power: Arc<dyn PowerControl>,
        loader: Arc<dyn FirmwareLoader>,
        ipcq: Arc<IpcQueue>,
        config: DeviceConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            power,
            loader,
            mailbox: Arc::clone(ipcq.mailbox()),
            ipcq,
            config,
            powered: RefCount::new(),
            booted: RefCount::new(),
            state: AtomicU32::new(DeviceState::Off.into()),
            ready: Mutex::new(None),
            sessions: AtomicU32::new(0),
            next_session_id: AtomicU32::new(1),
        })
    }

    /// Attach a new client
    pub fn open_session(self: &Arc<Self>) -> SessionResult<Session> {
        let max = self.config.max_sessions;
        let mut current = self.sessions.load(Ordering::SeqCst);
        loop {
            if current as usize >= max {
                warn!("session rejected, {} of {} open", current, max);
                return Err(SessionError::TooManySessions { max });
            }
            match self.sessions.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let id = self.next_session_id.fetch_add(1, Ordering::SeqCst);
        info!("session {} opened", id);
        Ok(Session::new(id, Arc::clone(self)))
    }

    pub(crate) fn session_closed(&self, id: u32) {
        self.sessions.fetch_sub(1, Ordering::SeqCst);
        info!("session {} closed", id);
    }

    pub fn state(&self) -> DeviceState {
        DeviceState::try_from(self.state.load(Ordering::SeqCst)).unwrap_or(DeviceState::Off)
    }

    fn set_state(&self, state: DeviceState) {
        self.state.store(state.into(), Ordering::SeqCst);
    }

    pub fn is_powered(&self) -> bool {
        self.powered.is_held()
    }

    pub fn is_booted(&self) -> bool {
        self.booted.is_held()
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            state: self.state(),
            power_refs: self.powered.get(),
            boot_refs: self.booted.get(),
            sessions: self.sessions.load(Ordering::SeqCst),
            error_count: self.ipcq.error_count(),
            outstanding: self.ipcq.outstanding(),
        }
    }

    pub fn ipcq(&self) -> &Arc<IpcQueue> {
        &self.ipcq
    }

    pub(crate) fn acquire_power(&self) -> SessionResult<()> {
        self.powered.acquire_with(|| self.power_up()).map(drop)
    }

    pub(crate) fn release_power(&self) {
        if let Err(e) = self.powered.release_with("device power", || self.power_down()) {
            error!("device power release: {}", e);
        }
    }

    pub(crate) fn acquire_boot(&self, image: &FirmwareImage) -> SessionResult<()> {
        self.booted.acquire_with(|| self.boot(image)).map(drop)
    }

    pub(crate) fn release_boot(&self) {
        if let Err(e) = self.booted.release_with("device boot", || self.shutdown()) {
            error!("device boot release: {}", e);
        }
    }

    fn power_up(&self) -> SessionResult<()> {
        info!("coprocessor power up");
        self.set_state(DeviceState::PoweringUp);

        let result = self.power_up_steps();
        match &result {
            Ok(()) => self.set_state(DeviceState::Powered),
            Err(e) => {
                error!("coprocessor power up failed: {}", e);
                self.mailbox.stop();
                self.quiet_power_off();
                self.set_state(DeviceState::Off);
            }
        }
        result
    }

    fn power_up_steps(&self) -> SessionResult<()> {
        self.power.power_on()?;
        self.power.reset_release()?;
        if !self.power.firmware_present() {
            return Err(SessionError::FirmwareMissing);
        }
        self.mailbox.start()?;
        self.ipcq.drain_pending();
        Ok(())
    }

    fn quiet_power_off(&self) {
        if let Err(e) = self.power.reset_assert() {
            warn!("reset assert failed: {}", e);
        }
        if let Err(e) = self.power.power_off() {
            warn!("power off failed: {}", e);
        }
    }

    fn power_down(&self) {
        info!("coprocessor power down");
        self.set_state(DeviceState::PoweringDown);
        self.mailbox.stop();
        self.quiet_power_off();
        self.set_state(DeviceState::Off);
    }

    fn boot(&self, image: &FirmwareImage) -> SessionResult<()> {
        info!("coprocessor boot '{}' ({} bytes)", image.name, image.data.len());
        self.set_state(DeviceState::Booting);

        if let Err(e) = self.ipcq.open() {
            self.set_state(DeviceState::Powered);
            return Err(e.into());
        }
        match self.loader.load_and_start(image) {
            Ok(token) => {
                *self.ready.lock_or_recover() = Some(token);
                self.set_state(DeviceState::Ready);
                Ok(())
            }
            Err(e) => {
                error!("firmware start failed: {}", e);
                self.ipcq.close();
                self.set_state(DeviceState::Powered);
                Err(e.into())
            }
        }
    }

    fn shutdown(&self) {
        info!("coprocessor firmware shutdown");
        self.set_state(DeviceState::ShuttingDown);
        self.ipcq.close();
        if let Some(token) = self.ready.lock_or_recover().take() {
            if let Err(e) = self.loader.stop(token) {
                warn!("firmware stop failed: {}", e);
            }
        }
        self.set_state(DeviceState::Powered);
    }
}
