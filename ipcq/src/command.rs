// Licensed under the Apache-2.0 license

//! Client-facing command, ticket and completion types

use crate::layout::{
    CmdParam, CmdType, IpcFunc, IpcHeader, RspParam, CMD_PARAM_WORDS, RSP_RESULT_WORDS,
};
use coproc_host_osal::Duration;

/// One command as a client describes it.
///
/// Parameters longer than one slot spill into a chain; each slot carries
/// [`CMD_PARAM_WORDS`] words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub header: IpcHeader,
    pub cmd_type: u32,
    pub params: Vec<u32>,
    /// Watchdog for this dispatch, overriding the queue default
    pub watchdog: Option<Duration>,
}

impl Command {
    pub fn new(func: IpcFunc, cmd_type: CmdType) -> Self {
        Self {
            header: IpcHeader::new(func, 0, 0),
            cmd_type: cmd_type.into(),
            params: Vec::new(),
            watchdog: None,
        }
    }

    /// Host-side control request; never reaches the coprocessor
    pub fn host_control(sub_func: u8) -> Self {
        Self {
            header: IpcHeader::new(IpcFunc::HostCtrl, sub_func, 0),
            cmd_type: CmdType::None.into(),
            params: Vec::new(),
            watchdog: None,
        }
    }

    /// Start of a scheduled frame. A non-zero `watchdog_ms` arms the
    /// watchdog for that many milliseconds.
    pub fn frame_start(watchdog_ms: u32) -> Self {
        Self::new(IpcFunc::SchedTable, CmdType::FrameStart).with_params(&[watchdog_ms])
    }

    pub fn with_sub_func(mut self, sub_func: u8) -> Self {
        self.header.set_sub_func(sub_func);
        self
    }

    pub fn with_params(mut self, params: &[u32]) -> Self {
        self.params = params.to_vec();
        self
    }

    pub fn with_watchdog(mut self, timeout: Duration) -> Self {
        self.watchdog = Some(timeout);
        self
    }

    pub fn is_frame_start(&self) -> bool {
        self.header.function() == Some(IpcFunc::SchedTable)
            && self.cmd_type == u32::from(CmdType::FrameStart)
    }

    /// Slots this command occupies
    pub fn slot_count(&self) -> usize {
        self.params.len().div_ceil(CMD_PARAM_WORDS).max(1)
    }

    /// Split into per-slot payloads. `cmd_id` is left for the queue to fill.
    pub fn to_slot_params(&self) -> Vec<CmdParam> {
        let mut out = Vec::with_capacity(self.slot_count());
        let mut chunks = self.params.chunks(CMD_PARAM_WORDS).peekable();
        if chunks.peek().is_none() {
            out.push(self.slot_param(&[]));
        }
        for chunk in chunks {
            out.push(self.slot_param(chunk));
        }
        out
    }

    fn slot_param(&self, words: &[u32]) -> CmdParam {
        let mut param = CmdParam {
            header: self.header.raw(),
            cmd_type: self.cmd_type,
            length: words.len() as u32,
            ..CmdParam::default()
        };
        param.params[..words.len()].copy_from_slice(words);
        param
    }
}

/// Handle for one dispatched command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket {
    id: u32,
    slots: usize,
    epoch: u32,
}

impl Ticket {
    pub(crate) fn new(id: u32, slots: usize, epoch: u32) -> Self {
        Self { id, slots, epoch }
    }

    /// Request id the response will echo
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Command slots held until completion; zero for host-handled commands
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Queue open the ticket was issued under. Request ids restart at every
    /// open, so an id alone does not identify a dispatch.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionKind {
    Done,
    /// Error-typed response other than silence or a hardware fault
    Error(u32),
    /// Watchdog expired before the coprocessor answered
    CoprocessorSilent,
    HardwareFault(CmdType),
}

/// Outcome of a dispatch as delivered to the waiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub id: u32,
    pub header: IpcHeader,
    pub ret: u32,
    pub cmd_type: u32,
    pub extra: u16,
    pub results: [u32; RSP_RESULT_WORDS],
    pub kind: CompletionKind,
    /// Built on the host rather than written by the coprocessor
    pub synthetic: bool,
}

impl Completion {
    pub(crate) fn from_response(param: &RspParam, synthetic: bool) -> Self {
        let code = u32::from(param.cmd_type);
        let kind = match CmdType::try_from(code) {
            Ok(CmdType::TimeoutNotify) => CompletionKind::CoprocessorSilent,
            Ok(kind) if kind.is_hardware_fault() => CompletionKind::HardwareFault(kind),
            _ if CmdType::is_error(code) => CompletionKind::Error(code),
            _ => CompletionKind::Done,
        };
        Self {
            id: param.rep_id,
            header: IpcHeader::from_raw(param.header),
            ret: param.ret,
            cmd_type: code,
            extra: param.extra,
            results: param.results,
            kind,
            synthetic,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.kind == CompletionKind::Done
    }
}
