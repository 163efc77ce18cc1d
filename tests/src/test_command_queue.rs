// Licensed under the Apache-2.0 license

//! Command slot allocation, chaining and release through the full stack

use crate::common::{test_constants::*, Behavior, TestBench};
use coproc_host_ipcq::layout::{CMD_PARAM_WORDS, CMD_SLOTS, MAX_CHAIN};
use coproc_host_ipcq::{Command, CmdType, ErrorClass, IpcFunc, IpcqError};

fn generic() -> Command {
    Command::new(IpcFunc::Generic, CmdType::Generic)
}

#[test]
fn test_chained_command_spans_slots() {
    let bench = TestBench::new();
    bench.open_queue();

    let params: Vec<u32> = (100..130).collect();
    let ticket = bench.ipcq.send(&generic().with_params(&params)).unwrap();
    assert_eq!(ticket.slots(), 3);

    let completion = bench.ipcq.wait(&ticket, WAIT).unwrap();
    assert!(completion.is_ok());
    assert_eq!(completion.extra, 3);
    assert_eq!(completion.results, [100, 101, 102, 103]);

    let received = bench.emulator.received();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].cmd_id, ticket.id());
    assert_eq!(received[0].params, params);
    assert_eq!(received[0].chain, vec![0, 1, 2]);

    assert_eq!(bench.ipcq.commands().in_use_count().unwrap(), 0);
}

#[test]
fn test_not_active_before_firmware_boot() {
    let bench = TestBench::new();
    bench.mailbox.start().unwrap();
    bench.ipcq.open().unwrap();

    let err = bench.ipcq.send(&generic()).unwrap_err();
    assert_eq!(err, IpcqError::NotActive);
    assert_eq!(err.class(), ErrorClass::Lifecycle);
    assert_eq!(bench.ipcq.commands().in_use_count().unwrap(), 0);
    assert!(bench.emulator.received().is_empty());
}

#[test]
fn test_closed_queue_rejects_dispatch() {
    let bench = TestBench::new();
    bench.mailbox.start().unwrap();
    bench.emulator.boot().unwrap();

    assert_eq!(bench.ipcq.send(&generic()).unwrap_err(), IpcqError::Closed);
}

#[test]
fn test_oversized_chain_rejected() {
    let bench = TestBench::new();
    bench.open_queue();

    let params = vec![0u32; (MAX_CHAIN + 1) * CMD_PARAM_WORDS];
    let err = bench.ipcq.send(&generic().with_params(&params)).unwrap_err();
    assert_eq!(
        err,
        IpcqError::InvalidChainLength {
            requested: MAX_CHAIN + 1,
            max: MAX_CHAIN
        }
    );
    assert_eq!(err.class(), ErrorClass::ProtocolViolation);

    let params = vec![0u32; MAX_CHAIN * CMD_PARAM_WORDS];
    let ticket = bench.ipcq.send(&generic().with_params(&params)).unwrap();
    assert_eq!(ticket.slots(), MAX_CHAIN);
    assert!(bench.ipcq.wait(&ticket, WAIT).unwrap().is_ok());
}

#[test]
fn test_exhaustion_then_recovery() {
    let bench = TestBench::new();
    bench.open_queue();
    bench.emulator.set_behavior(Behavior::Hold);

    let tickets: Vec<_> = (0..CMD_SLOTS)
        .map(|_| bench.ipcq.send(&generic()).unwrap())
        .collect();
    assert_eq!(bench.ipcq.commands().in_use_count().unwrap(), CMD_SLOTS);

    let err = bench.ipcq.send(&generic()).unwrap_err();
    assert!(matches!(err, IpcqError::NoFreeSlot { .. }));
    assert!(err.is_retryable());

    bench.emulator.set_behavior(Behavior::Echo);
    assert_eq!(bench.emulator.release_held(), CMD_SLOTS);
    for ticket in &tickets {
        assert!(bench.ipcq.wait(ticket, WAIT).unwrap().is_ok());
    }
    assert_eq!(bench.ipcq.commands().in_use_count().unwrap(), 0);

    let ticket = bench.ipcq.send(&generic()).unwrap();
    assert!(bench.ipcq.wait(&ticket, WAIT).unwrap().is_ok());
}

#[test]
fn test_cursor_wraps_around_occupied_slot() {
    let bench = TestBench::new();
    bench.open_queue();
    bench.emulator.set_behavior(Behavior::Hold);

    let cmdq = bench.ipcq.commands();
    cmdq.set_cursor(CMD_SLOTS - 2).unwrap();
    let blocker = bench.ipcq.send(&generic()).unwrap();

    cmdq.set_cursor(CMD_SLOTS - 2).unwrap();
    let params = vec![1u32; 3 * CMD_PARAM_WORDS];
    let wrapped = bench.ipcq.send(&generic().with_params(&params)).unwrap();

    bench.emulator.set_behavior(Behavior::Echo);
    bench.emulator.release_held();
    assert!(bench.ipcq.wait(&blocker, WAIT).unwrap().is_ok());
    assert!(bench.ipcq.wait(&wrapped, WAIT).unwrap().is_ok());

    let received = bench.emulator.received();
    assert_eq!(received[0].chain, vec![CMD_SLOTS - 2]);
    assert_eq!(received[1].chain, vec![CMD_SLOTS - 1, 0, 1]);
}

#[test]
fn test_double_free_is_rejected() {
    let bench = TestBench::new();
    bench.open_queue();

    let cmdq = bench.ipcq.commands();
    let chain = cmdq.allocate(2).unwrap();
    assert_eq!(cmdq.chain_of(chain.slots()[1]).unwrap(), chain.slots());

    assert_eq!(cmdq.free(chain.head()).unwrap(), 2);
    let err = cmdq.free(chain.head()).unwrap_err();
    assert_eq!(err, IpcqError::AlreadyFree { slot: chain.head() });
    assert_eq!(err.class(), ErrorClass::ProtocolViolation);
    assert_eq!(cmdq.in_use_count().unwrap(), 0);
}

#[test]
fn test_request_ids_restart_at_open() {
    let bench = TestBench::new();
    bench.open_queue();

    let ids: Vec<u32> = (0..3)
        .map(|_| {
            let ticket = bench.ipcq.send(&generic()).unwrap();
            bench.ipcq.wait(&ticket, WAIT).unwrap();
            ticket.id()
        })
        .collect();
    assert_eq!(ids, vec![0, 1, 2]);

    bench.ipcq.close();
    bench.ipcq.open().unwrap();
    let ticket = bench.ipcq.send(&generic()).unwrap();
    assert_eq!(ticket.id(), 0);
    assert!(bench.ipcq.wait(&ticket, WAIT).unwrap().is_ok());
}
