// Licensed under the Apache-2.0 license

//! Per-client handle onto the shared coprocessor

use crate::device::Coprocessor;
use crate::error::{SessionError, SessionResult};
use crate::hal::FirmwareImage;
use crate::refcount::RefCount;
use coproc_host_ipcq::{Command, Completion, CompletionKind, IpcqError, Ticket};
use coproc_host_osal::{AtomicBool, Duration, Instant, Mutex};
use core::sync::atomic::Ordering;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::sync::Arc;

/// Session statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStatistics {
    pub commands_sent: u64,
    pub responses_received: u64,
    pub error_responses: u64,
    pub coprocessor_silences: u64,
    pub wait_timeouts: u64,
}

/// Session information structure
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub session_id: u32,
    pub opened_at: Instant,
    pub last_activity: Instant,
    pub power_refs: u32,
    pub boot_refs: u32,
    pub outstanding: usize,
    pub detached: bool,
    pub stats: SessionStatistics,
}

struct Activity {
    tickets: HashSet<Ticket>,
    stats: SessionStatistics,
    last_activity: Instant,
}

/// One client of the coprocessor.
///
/// Power and boot are counted per session; only the first acquire and the
/// last release of a session touch the device-wide counts. Dropping the
/// session detaches it.
pub struct Session {
    id: u32,
    device: Arc<Coprocessor>,
    power: RefCount,
    boot: RefCount,
    activity: Mutex<Activity>,
    detached: AtomicBool,
    opened_at: Instant,
}

impl Session {
    pub(crate) fn new(id: u32, device: Arc<Coprocessor>) -> Self {
        let now = Instant::now();
        Self {
            id,
            device,
            power: RefCount::new(),
            boot: RefCount::new(),
            activity: Mutex::new(Activity {
                tickets: HashSet::new(),
                stats: SessionStatistics::default(),
                last_activity: now,
            }),
            detached: AtomicBool::new(false),
            opened_at: now,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn device(&self) -> &Arc<Coprocessor> {
        &self.device
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    fn ensure_attached(&self) -> SessionResult<()> {
        if self.is_detached() {
            return Err(SessionError::Detached(self.id));
        }
        Ok(())
    }

    pub fn holds_power(&self) -> bool {
        self.power.is_held()
    }

    pub fn holds_boot(&self) -> bool {
        self.boot.is_held()
    }

    /// Take a power reference, powering the coprocessor up if no other
    /// session holds it.
    pub fn acquire_power(&self) -> SessionResult<()> {
        self.ensure_attached()?;
        if self.power.acquire_with(|| self.device.acquire_power())? {
            debug!("session {} took device power", self.id);
        }
        Ok(())
    }

    pub fn release_power(&self) -> SessionResult<()> {
        self.ensure_attached()?;
        if self.boot.is_held() {
            return Err(SessionError::BootHeld);
        }
        if self
            .power
            .release_with("power", || self.device.release_power())?
        {
            debug!("session {} dropped device power", self.id);
        }
        Ok(())
    }

    /// Take a boot reference, loading and starting `image` if the firmware
    /// is not already running. The session must hold power.
    pub fn acquire_boot(&self, image: &FirmwareImage) -> SessionResult<()> {
        self.ensure_attached()?;
        if !self.power.is_held() {
            return Err(SessionError::NotPowered);
        }
        if self.boot.acquire_with(|| self.device.acquire_boot(image))? {
            debug!("session {} took device boot", self.id);
        }
        Ok(())
    }

    pub fn release_boot(&self) -> SessionResult<()> {
        self.ensure_attached()?;
        if self
            .boot
            .release_with("boot", || self.device.release_boot())?
        {
            debug!("session {} dropped device boot", self.id);
        }
        Ok(())
    }

    pub fn send_command(&self, command: &Command) -> SessionResult<Ticket> {
        self.ensure_attached()?;
        if !self.boot.is_held() {
            return Err(SessionError::NotBooted);
        }

        let ipcq = self.device.ipcq();
        let ticket = ipcq.send(command)?;
        let mut activity = self.activity.lock_or_recover();
        // Tickets issued before the last boot were retired with it
        activity.tickets.retain(|t| ipcq.is_current(t));
        activity.tickets.insert(ticket);
        activity.stats.commands_sent += 1;
        activity.last_activity = Instant::now();
        Ok(ticket)
    }

    /// Block until `ticket` completes or `timeout` passes. A timed-out wait
    /// leaves the ticket outstanding so it can be waited on again.
    pub fn wait_response(&self, ticket: &Ticket, timeout: Duration) -> SessionResult<Completion> {
        self.ensure_attached()?;
        self.owns(ticket)?;
        let result = self.device.ipcq().wait(ticket, timeout);
        Ok(self.account(ticket, result)?)
    }

    pub fn wait_response_default(&self, ticket: &Ticket) -> SessionResult<Completion> {
        self.ensure_attached()?;
        self.owns(ticket)?;
        let result = self.device.ipcq().wait_default(ticket);
        Ok(self.account(ticket, result)?)
    }

    /// Send and wait in one call
    pub fn execute(&self, command: &Command, timeout: Duration) -> SessionResult<Completion> {
        let ticket = self.send_command(command)?;
        self.wait_response(&ticket, timeout)
    }

    /// Stop waiting for `ticket`; a late response is discarded
    pub fn abandon(&self, ticket: &Ticket) -> bool {
        let owned = self.activity.lock_or_recover().tickets.remove(ticket);
        owned && self.device.ipcq().abandon(ticket)
    }

    fn owns(&self, ticket: &Ticket) -> SessionResult<()> {
        if self.activity.lock_or_recover().tickets.contains(ticket) {
            Ok(())
        } else {
            Err(IpcqError::UnknownTicket(ticket.id()).into())
        }
    }

    fn account(
        &self,
        ticket: &Ticket,
        result: Result<Completion, IpcqError>,
    ) -> Result<Completion, IpcqError> {
        let mut activity = self.activity.lock_or_recover();
        activity.last_activity = Instant::now();
        match &result {
            Ok(completion) => {
                activity.tickets.remove(ticket);
                activity.stats.responses_received += 1;
                match completion.kind {
                    CompletionKind::Done => {}
                    CompletionKind::CoprocessorSilent => activity.stats.coprocessor_silences += 1,
                    CompletionKind::Error(_) | CompletionKind::HardwareFault(_) => {
                        activity.stats.error_responses += 1
                    }
                }
            }
            Err(IpcqError::Timeout) => activity.stats.wait_timeouts += 1,
            Err(_) => {
                activity.tickets.remove(ticket);
            }
        }
        result
    }

    pub fn info(&self) -> SessionInfo {
        let ipcq = self.device.ipcq();
        let activity = self.activity.lock_or_recover();
        SessionInfo {
            session_id: self.id,
            opened_at: self.opened_at,
            last_activity: activity.last_activity,
            power_refs: self.power.get(),
            boot_refs: self.boot.get(),
            outstanding: activity
                .tickets
                .iter()
                .filter(|t| ipcq.is_current(t))
                .count(),
            detached: self.is_detached(),
            stats: activity.stats.clone(),
        }
    }

    /// Forcibly drop everything this session holds: outstanding tickets, then
    /// every boot reference, then every power reference. Safe to call more
    /// than once.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }

        let tickets: Vec<Ticket> = self
            .activity
            .lock_or_recover()
            .tickets
            .drain()
            .collect();
        for ticket in &tickets {
            self.device.ipcq().abandon(ticket);
        }

        let boot = self.boot.release_all_with(|| self.device.release_boot());
        let power = self.power.release_all_with(|| self.device.release_power());
        if boot != 0 || power != 0 || !tickets.is_empty() {
            warn!(
                "session {} detached holding boot={} power={} tickets={}",
                self.id,
                boot,
                power,
                tickets.len()
            );
        } else {
            info!("session {} detached", self.id);
        }
        self.device.session_closed(self.id);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.detach();
    }
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("power", &self.power.get())
            .field("boot", &self.boot.get())
            .field("detached", &self.is_detached())
            .finish()
    }
}
