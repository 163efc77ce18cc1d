// Licensed under the Apache-2.0 license

//! Shared-memory layout of the command and response queues
//!
//! Both sides compile the same slot counts; the layout is never negotiated.
//!
//! ```text
//! offset 0            cmd queue flags (u32, ACTIVE = bit 0, set by firmware)
//! offset 4            CmdSlot[CMD_SLOTS]   { flags: u32, param: CmdParam }
//! RSP_QUEUE_FLAGS     rsp queue flags (u32, ACTIVE = bit 0, set by host)
//! RSP_QUEUE_FLAGS + 4 RspSlot[RSP_SLOTS]   { flags: u32, param: RspParam }
//! ```
//!
//! Mailbox payloads carry the coprocessor-frame address of a slot's `param`
//! member; the flags word sits immediately before it.

use bitfield::bitfield;
use core::mem::size_of;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const CMD_SLOTS: usize = 32;
pub const RSP_SLOTS: usize = 32;

/// Longest chain a single command may occupy
pub const MAX_CHAIN: usize = CMD_SLOTS / 2;

pub const CMD_PARAM_WORDS: usize = 12;
pub const RSP_RESULT_WORDS: usize = 4;

/// Queue flags word: the channel accepts new entries
pub const QUEUE_ACTIVE: u32 = 1 << 0;

bitfield! {
    /// Per-slot flags word.
    #[derive(Copy, Clone, PartialEq, Eq, Default)]
    pub struct SlotFlags(u32);
    impl Debug;
    pub used, set_used: 0;
    pub head, set_head: 1;
    pub tail, set_tail: 2;
    pub has_next, set_has_next: 3;
    /// Response lives in host memory, not in the shared array
    pub heap, set_heap: 4;
    pub u8, next_id, set_next_id: 15, 8;
    pub u8, head_id, set_head_id: 23, 16;
}

impl SlotFlags {
    pub const fn from_raw(raw: u32) -> Self {
        SlotFlags(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }
}

bitfield! {
    /// Command/response header word.
    #[derive(Copy, Clone, PartialEq, Eq, Default)]
    pub struct IpcHeader(u32);
    impl Debug;
    pub u8, func, set_func: 31, 24;
    pub u8, sub_func, set_sub_func: 23, 16;
    pub u16, extra, set_extra: 15, 0;
}

impl IpcHeader {
    pub fn new(func: IpcFunc, sub_func: u8, extra: u16) -> Self {
        let mut header = IpcHeader(0);
        header.set_func(func.into());
        header.set_sub_func(sub_func);
        header.set_extra(extra);
        header
    }

    pub const fn from_raw(raw: u32) -> Self {
        IpcHeader(raw)
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub fn function(&self) -> Option<IpcFunc> {
        IpcFunc::try_from(self.func()).ok()
    }
}

/// Function groups carried in the header
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum IpcFunc {
    /// Handled on the host, never forwarded to the coprocessor
    HostCtrl = 1,
    SchedTable = 2,
    Generic = 3,
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum HostCtrlSub {
    /// Wake a thread blocked in a response wait
    ReleaseWait = 1,
}

/// Command and response type codes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
pub enum CmdType {
    None = 0,
    Init = 1,
    Deinit = 2,
    FrameStart = 3,
    FrameDone = 4,
    Generic = 5,

    TimeoutNotify = 0x100,
    SignalNotify = 0x101,
    UnknownNotify = 0x102,

    BusFault = 0x110,
    SlaveError = 0x111,
    Deadlock = 0x112,
}

impl CmdType {
    /// Codes at or above this value report an error
    pub const ERR_BASE: u32 = 0x100;

    pub fn is_error(code: u32) -> bool {
        code >= Self::ERR_BASE
    }

    pub fn is_hardware_fault(&self) -> bool {
        matches!(
            self,
            CmdType::BusFault | CmdType::SlaveError | CmdType::Deadlock
        )
    }
}

/// Command payload as seen by the firmware
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout,
)]
pub struct CmdParam {
    pub header: u32,
    /// Request id, identical in every slot of a chain
    pub cmd_id: u32,
    pub cmd_type: u32,
    /// Number of valid words in `params`
    pub length: u32,
    pub params: [u32; CMD_PARAM_WORDS],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct CmdSlot {
    pub flags: u32,
    pub param: CmdParam,
}

/// Response payload as written by the firmware
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout,
)]
pub struct RspParam {
    pub header: u32,
    /// Echo of the request id being answered
    pub rep_id: u32,
    pub ret: u32,
    pub cmd_type: u16,
    pub extra: u16,
    pub results: [u32; RSP_RESULT_WORDS],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, IntoBytes, FromBytes, Immutable, KnownLayout)]
pub struct RspSlot {
    pub flags: u32,
    pub param: RspParam,
}

pub const CMD_SLOT_SIZE: usize = size_of::<CmdSlot>();
pub const RSP_SLOT_SIZE: usize = size_of::<RspSlot>();

pub const CMD_QUEUE_FLAGS: usize = 0;
pub const CMD_SLOTS_BASE: usize = CMD_QUEUE_FLAGS + 4;
pub const RSP_QUEUE_FLAGS: usize = CMD_SLOTS_BASE + CMD_SLOTS * CMD_SLOT_SIZE;
pub const RSP_SLOTS_BASE: usize = RSP_QUEUE_FLAGS + 4;

/// Bytes of shared memory the queues occupy
pub const REGION_SIZE: usize = RSP_SLOTS_BASE + RSP_SLOTS * RSP_SLOT_SIZE;

const _: () = assert!(size_of::<CmdParam>() == 64);
const _: () = assert!(size_of::<RspParam>() == 32);
const _: () = assert!(CMD_SLOT_SIZE % 4 == 0 && RSP_SLOT_SIZE % 4 == 0);
const _: () = assert!(CMD_SLOTS <= 256 && RSP_SLOTS <= 256);

pub const fn cmd_slot_offset(slot: usize) -> usize {
    CMD_SLOTS_BASE + slot * CMD_SLOT_SIZE
}

pub const fn cmd_param_offset(slot: usize) -> usize {
    cmd_slot_offset(slot) + 4
}

pub const fn rsp_slot_offset(slot: usize) -> usize {
    RSP_SLOTS_BASE + slot * RSP_SLOT_SIZE
}

pub const fn rsp_param_offset(slot: usize) -> usize {
    rsp_slot_offset(slot) + 4
}

/// Map a host offset back to the command slot whose param starts there
pub fn cmd_slot_at(param_offset: usize) -> Option<usize> {
    let rel = param_offset.checked_sub(cmd_param_offset(0))?;
    let slot = rel / CMD_SLOT_SIZE;
    (rel % CMD_SLOT_SIZE == 0 && slot < CMD_SLOTS).then_some(slot)
}

/// Map a host offset back to the response slot whose param starts there
pub fn rsp_slot_at(param_offset: usize) -> Option<usize> {
    let rel = param_offset.checked_sub(rsp_param_offset(0))?;
    let slot = rel / RSP_SLOT_SIZE;
    (rel % RSP_SLOT_SIZE == 0 && slot < RSP_SLOTS).then_some(slot)
}
