// Licensed under the Apache-2.0 license

//! Command/response round trips through the IPC queue

use crate::common::{test_constants::*, wait_until, Behavior, TestBench};
use coproc_host_ipcq::layout::{rsp_slot_offset, HostCtrlSub};
use coproc_host_ipcq::{
    Command, CmdType, CompletionKind, Direction, ErrorClass, IpcFunc, IpcqError, SharedRegion,
};
use std::sync::Arc;

fn generic() -> Command {
    Command::new(IpcFunc::Generic, CmdType::Generic)
}

#[test]
fn test_echo_round_trip() {
    let bench = TestBench::new();
    bench.open_queue();

    let ticket = bench
        .ipcq
        .send(&generic().with_sub_func(0x21).with_params(&[1, 2, 3]))
        .unwrap();
    assert_eq!(bench.ipcq.outstanding(), 1);

    let completion = bench.ipcq.wait(&ticket, WAIT).unwrap();
    assert_eq!(completion.id, ticket.id());
    assert_eq!(completion.kind, CompletionKind::Done);
    assert!(!completion.synthetic);
    assert_eq!(completion.cmd_type, u32::from(CmdType::Generic));
    assert_eq!(completion.header.function(), Some(IpcFunc::Generic));
    assert_eq!(completion.header.sub_func(), 0x21);
    assert_eq!(completion.results, [1, 2, 3, 0]);

    assert_eq!(bench.ipcq.outstanding(), 0);
    assert_eq!(bench.ipcq.pending_stats().queued, 0);
    for slot in 0..4 {
        assert_eq!(bench.region.load(rsp_slot_offset(slot)).unwrap(), 0);
    }

    // Completed tickets cannot be waited on twice
    assert_eq!(
        bench.ipcq.wait(&ticket, SHORT_WAIT).unwrap_err(),
        IpcqError::Cancelled
    );
}

#[test]
fn test_out_of_order_waits() {
    let bench = TestBench::new();
    bench.open_queue();
    bench.emulator.set_behavior(Behavior::Hold);

    let first = bench.ipcq.send(&generic().with_params(&[10])).unwrap();
    let second = bench.ipcq.send(&generic().with_params(&[20])).unwrap();
    assert!(wait_until(WAIT, || bench.emulator.held_count() == 2));
    bench.emulator.release_held();

    let done = bench.ipcq.wait(&second, WAIT).unwrap();
    assert_eq!(done.results[0], 20);
    let done = bench.ipcq.wait(&first, WAIT).unwrap();
    assert_eq!(done.results[0], 10);
}

#[test]
fn test_read_any_takes_next_completion() {
    let bench = TestBench::new();
    bench.open_queue();

    let ticket = bench.ipcq.send(&generic().with_params(&[5])).unwrap();
    let completion = bench.ipcq.read_any(WAIT).unwrap();
    assert_eq!(completion.id, ticket.id());
    assert_eq!(
        bench.ipcq.read_any(SHORT_WAIT).unwrap_err(),
        IpcqError::Timeout
    );
}

#[test]
fn test_hardware_fault_escalates() {
    let bench = TestBench::new();
    bench.open_queue();
    bench.emulator.script(&[Behavior::Fault(CmdType::BusFault)]);

    let ticket = bench.ipcq.send(&generic()).unwrap();
    let completion = bench.ipcq.wait(&ticket, WAIT).unwrap();
    assert_eq!(
        completion.kind,
        CompletionKind::HardwareFault(CmdType::BusFault)
    );
    assert!(!completion.is_ok());

    let faults = bench.supervisor.faults();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].dispatch_id, ticket.id());
    assert_eq!(faults[0].kind, CmdType::BusFault);
    assert_eq!(faults[0].ret, 0xDEAD);
    assert!(bench.supervisor.fatal().is_empty());
}

#[test]
fn test_error_response_is_not_a_fault() {
    let bench = TestBench::new();
    bench.open_queue();
    bench.emulator.script(&[Behavior::Fault(CmdType::UnknownNotify)]);

    let ticket = bench.ipcq.send(&generic()).unwrap();
    let completion = bench.ipcq.wait(&ticket, WAIT).unwrap();
    assert_eq!(
        completion.kind,
        CompletionKind::Error(u32::from(CmdType::UnknownNotify))
    );
    assert!(bench.supervisor.faults().is_empty());
}

#[test]
fn test_response_queue_flow_control() {
    let bench = TestBench::new();
    bench.open_queue();
    bench.emulator.limit_response_slots(2);

    let tickets: Vec<_> = (0..3)
        .map(|i| bench.ipcq.send(&generic().with_params(&[i])).unwrap())
        .collect();
    assert!(wait_until(WAIT, || bench.emulator.full_reports() == 1));
    assert!(wait_until(WAIT, || bench.ipcq.responses().is_starved()));
    assert_eq!(bench.emulator.deferred_count(), 1);

    // Releasing the first slot tells the firmware there is room again
    assert!(bench.ipcq.wait(&tickets[0], WAIT).unwrap().is_ok());
    assert!(wait_until(WAIT, || bench.emulator.free_signals() == 1));
    assert!(!bench.ipcq.responses().is_starved());

    for (i, ticket) in tickets.iter().enumerate().skip(1) {
        let completion = bench.ipcq.wait(ticket, WAIT).unwrap();
        assert_eq!(completion.results[0], i as u32);
    }
    assert_eq!(bench.emulator.deferred_count(), 0);
    assert_eq!(bench.emulator.full_reports(), 1);
}

#[test]
fn test_release_wait_answered_on_host() {
    let bench = TestBench::new();
    bench.open_queue();

    let ticket = bench
        .ipcq
        .send(&Command::host_control(HostCtrlSub::ReleaseWait.into()))
        .unwrap();
    assert_eq!(ticket.slots(), 0);
    assert!(ticket.id() >= 0x8000_0000);

    let completion = bench.ipcq.wait(&ticket, WAIT).unwrap();
    assert!(completion.synthetic);
    assert_eq!(completion.cmd_type, u32::from(CmdType::Deinit));
    assert_eq!(completion.header.function(), Some(IpcFunc::HostCtrl));
    assert!(bench.emulator.received().is_empty());
    assert_eq!(bench.mailbox.stats().posted, 0);
}

#[test]
fn test_unknown_host_control_rejected() {
    let bench = TestBench::new();
    bench.open_queue();

    let err = bench.ipcq.send(&Command::host_control(0x7E)).unwrap_err();
    assert_eq!(err, IpcqError::UnsupportedControl(0x7E));
    assert_eq!(err.class(), ErrorClass::ProtocolViolation);
}

#[test]
fn test_transaction_history() {
    let bench = TestBench::new();
    bench.open_queue();

    let ticket = bench.ipcq.send(&generic()).unwrap();
    bench.ipcq.wait(&ticket, WAIT).unwrap();

    let history = bench.ipcq.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].direction, Direction::Sent);
    assert_eq!(history[1].direction, Direction::Received);
    assert!(history.iter().all(|t| t.id == ticket.id()));
    assert!(history[0].at <= history[1].at);
}

#[test]
fn test_concurrent_senders() {
    let bench = TestBench::new();
    bench.open_queue();
    bench.emulator.set_behavior(Behavior::Echo);

    let ipcq = Arc::clone(&bench.ipcq);
    let workers: Vec<_> = (0..4u32)
        .map(|worker| {
            let ipcq = Arc::clone(&ipcq);
            std::thread::spawn(move || {
                for i in 0..25u32 {
                    let tag = (worker << 16) | i;
                    let ticket = ipcq.send(&generic().with_params(&[tag])).unwrap();
                    let completion = ipcq.wait(&ticket, WAIT).unwrap();
                    assert_eq!(completion.results[0], tag);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(bench.ipcq.outstanding(), 0);
    assert_eq!(bench.ipcq.commands().in_use_count().unwrap(), 0);
    assert_eq!(bench.emulator.received().len(), 100);
}
