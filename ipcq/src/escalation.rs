// Licensed under the Apache-2.0 license

//! Error counting and escalation to a supervising layer

use crate::layout::CmdType;
use coproc_host_osal::AtomicU32;
use core::sync::atomic::Ordering;
use log::error;
use std::sync::Arc;

/// Start of an ongoing coprocessor-silence failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorEpisode {
    /// Dispatch whose watchdog fired
    pub dispatch_id: u32,
    pub error_count: u32,
}

/// Fault reported by the accelerator side in a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HardwareFault {
    pub dispatch_id: u32,
    pub kind: CmdType,
    pub ret: u32,
}

/// Layer that decides whether and how to recover the coprocessor
pub trait Supervisor: Send + Sync {
    /// First error of an episode; further silence is not reported until the
    /// counter is reset.
    fn report_fatal(&self, episode: &ErrorEpisode);

    /// Reported for every fault, without rate limiting
    fn report_fault(&self, fault: &HardwareFault);
}

/// Supervisor that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSupervisor;

impl Supervisor for LogSupervisor {
    fn report_fatal(&self, episode: &ErrorEpisode) {
        error!(
            "coprocessor unresponsive (dispatch {}), recovery needed",
            episode.dispatch_id
        );
    }

    fn report_fault(&self, fault: &HardwareFault) {
        error!(
            "coprocessor hardware fault {:?} (ret 0x{:08x}) on dispatch {}",
            fault.kind, fault.ret, fault.dispatch_id
        );
    }
}

/// Silence episodes and hardware faults are counted apart: a fault is
/// reported on its own and never opens or closes a silence episode.
pub struct ErrorEscalation {
    count: AtomicU32,
    faults: AtomicU32,
    supervisor: Arc<dyn Supervisor>,
}

impl ErrorEscalation {
    pub fn new(supervisor: Arc<dyn Supervisor>) -> Self {
        Self {
            count: AtomicU32::new(0),
            faults: AtomicU32::new(0),
            supervisor,
        }
    }

    /// Count a watchdog expiry. Only the transition away from zero reaches
    /// the supervisor.
    pub fn record_silence(&self, dispatch_id: u32) -> u32 {
        let error_count = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        if error_count == 1 {
            self.supervisor.report_fatal(&ErrorEpisode {
                dispatch_id,
                error_count,
            });
        }
        error_count
    }

    /// Report a hardware fault immediately. Returns the running fault total.
    pub fn record_fault(&self, fault: HardwareFault) -> u32 {
        let faults = self.faults.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        self.supervisor.report_fault(&fault);
        faults
    }

    /// Start a new episode, e.g. on a frame start
    pub fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }

    /// Silences in the current episode
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn fault_count(&self) -> u32 {
        self.faults.load(Ordering::SeqCst)
    }
}
