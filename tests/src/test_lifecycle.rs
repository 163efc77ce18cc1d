// Licensed under the Apache-2.0 license

//! Power, boot and session lifecycle against the emulated coprocessor

use crate::common::{
    quick_ipcq_config, quick_mailbox_config, test_constants::*, wait_until, Behavior, TestBench,
};
use coproc_host_ipcq::{Command, CmdType, CompletionKind, IpcFunc, IpcqError};
use coproc_host_session::{DeviceConfig, DeviceState, HalError, SessionError};
use std::sync::Arc;

fn generic() -> Command {
    Command::new(IpcFunc::Generic, CmdType::Generic)
}

#[test]
fn test_power_sequence_shared_by_sessions() {
    let bench = TestBench::new();
    let first = bench.device.open_session().unwrap();
    let second = bench.device.open_session().unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(bench.device.state(), DeviceState::Off);

    first.acquire_power().unwrap();
    assert_eq!(bench.power.calls(), vec!["power_on", "reset_release"]);
    assert_eq!(bench.device.state(), DeviceState::Powered);
    assert!(bench.mailbox.is_running());

    second.acquire_power().unwrap();
    assert_eq!(bench.power.count("power_on"), 1);
    assert_eq!(bench.device.status().power_refs, 2);

    first.release_power().unwrap();
    assert!(bench.device.is_powered());
    assert!(bench.power.count("power_off") == 0);

    second.release_power().unwrap();
    assert_eq!(
        bench.power.calls(),
        vec!["power_on", "reset_release", "reset_assert", "power_off"]
    );
    assert_eq!(bench.device.state(), DeviceState::Off);
    assert!(!bench.mailbox.is_running());
}

#[test]
fn test_nested_acquires_count_once() {
    let bench = TestBench::new();
    let session = bench.device.open_session().unwrap();

    session.acquire_power().unwrap();
    session.acquire_power().unwrap();
    assert_eq!(session.info().power_refs, 2);
    assert_eq!(bench.device.status().power_refs, 1);

    session.acquire_boot(&TestBench::firmware()).unwrap();
    session.acquire_boot(&TestBench::firmware()).unwrap();
    assert_eq!(bench.loader.starts(), 1);
    assert_eq!(bench.device.status().boot_refs, 1);

    session.release_boot().unwrap();
    assert!(bench.device.is_booted());
    session.release_boot().unwrap();
    assert!(!bench.device.is_booted());
    assert_eq!(bench.loader.stops(), 1);
    assert_eq!(
        session.release_boot().unwrap_err(),
        SessionError::NotHeld("boot")
    );

    session.release_power().unwrap();
    assert!(bench.device.is_powered());
    session.release_power().unwrap();
    assert!(!bench.device.is_powered());
    assert_eq!(
        session.release_power().unwrap_err(),
        SessionError::NotHeld("power")
    );
}

#[test]
fn test_ordering_rules() {
    let bench = TestBench::new();
    let session = bench.device.open_session().unwrap();

    assert_eq!(
        session.acquire_boot(&TestBench::firmware()).unwrap_err(),
        SessionError::NotPowered
    );
    assert_eq!(
        session.send_command(&generic()).unwrap_err(),
        SessionError::NotBooted
    );

    session.acquire_power().unwrap();
    session.acquire_boot(&TestBench::firmware()).unwrap();
    assert_eq!(session.release_power().unwrap_err(), SessionError::BootHeld);
    assert!(bench.device.is_powered());

    // Power held by another session does not satisfy this one
    let other = bench.device.open_session().unwrap();
    assert_eq!(
        other.acquire_boot(&TestBench::firmware()).unwrap_err(),
        SessionError::NotPowered
    );
    assert_eq!(
        other.send_command(&generic()).unwrap_err(),
        SessionError::NotBooted
    );
}

#[test]
fn test_missing_firmware_rolls_back() {
    let bench = TestBench::new();
    bench.power.set_firmware_missing(true);
    let session = bench.device.open_session().unwrap();

    assert_eq!(
        session.acquire_power().unwrap_err(),
        SessionError::FirmwareMissing
    );
    assert_eq!(
        bench.power.calls(),
        vec!["power_on", "reset_release", "reset_assert", "power_off"]
    );
    assert_eq!(bench.device.state(), DeviceState::Off);
    assert!(!bench.mailbox.is_running());
    assert!(!session.holds_power());
    assert!(!bench.device.is_powered());

    bench.power.set_firmware_missing(false);
    bench.power.clear();
    session.acquire_power().unwrap();
    assert_eq!(bench.power.calls(), vec!["power_on", "reset_release"]);
}

#[test]
fn test_power_on_failure_rolls_back() {
    let bench = TestBench::new();
    bench.power.set_fail_power_on(true);
    let session = bench.device.open_session().unwrap();

    let err = session.acquire_power().unwrap_err();
    assert_eq!(
        err,
        SessionError::Hal(HalError::new("power", "rail did not come up"))
    );
    assert_eq!(
        bench.power.calls(),
        vec!["power_on", "reset_assert", "power_off"]
    );
    assert_eq!(bench.device.state(), DeviceState::Off);
    assert_eq!(bench.device.status().power_refs, 0);
}

#[test]
fn test_boot_failure_rolls_back() {
    let bench = TestBench::new();
    let session = bench.device.open_session().unwrap();
    session.acquire_power().unwrap();

    bench.loader.set_fail_start(true);
    let err = session.acquire_boot(&TestBench::firmware()).unwrap_err();
    assert!(matches!(err, SessionError::Hal(_)));
    assert!(!session.holds_boot());
    assert!(!bench.device.is_booted());
    assert!(!bench.ipcq.is_open());
    assert_eq!(bench.device.state(), DeviceState::Powered);

    bench.loader.set_fail_start(false);
    session.acquire_boot(&TestBench::firmware()).unwrap();
    assert_eq!(bench.device.state(), DeviceState::Ready);
    assert_eq!(bench.loader.last_image(), Some(TestBench::firmware()));
    assert!(session.execute(&generic(), WAIT).unwrap().is_ok());
}

#[test]
fn test_detach_releases_everything() {
    let bench = TestBench::new();
    let session = bench.booted_session();
    session.acquire_power().unwrap();
    assert_eq!(bench.device.state(), DeviceState::Ready);

    bench.emulator.set_behavior(Behavior::Hold);
    let ticket = session.send_command(&generic()).unwrap();
    assert_eq!(session.info().outstanding, 1);

    session.detach();
    session.detach();
    assert!(session.is_detached());
    assert_eq!(bench.ipcq.outstanding(), 0);
    assert_eq!(bench.loader.stops(), 1);
    assert_eq!(bench.power.count("power_off"), 1);
    assert_eq!(bench.device.state(), DeviceState::Off);
    assert_eq!(bench.device.status().sessions, 0);

    let info = session.info();
    assert!(info.detached);
    assert_eq!(info.power_refs, 0);
    assert_eq!(info.boot_refs, 0);
    assert_eq!(info.outstanding, 0);

    let id = session.id();
    assert_eq!(
        session.acquire_power().unwrap_err(),
        SessionError::Detached(id)
    );
    assert_eq!(
        session.send_command(&generic()).unwrap_err(),
        SessionError::Detached(id)
    );
    assert_eq!(
        session.wait_response(&ticket, SHORT_WAIT).unwrap_err(),
        SessionError::Detached(id)
    );
    assert!(!session.abandon(&ticket));
}

#[test]
fn test_drop_detaches() {
    let bench = TestBench::new();
    {
        let _session = bench.booted_session();
        assert_eq!(bench.device.status().sessions, 1);
    }
    assert_eq!(bench.device.status().sessions, 0);
    assert_eq!(bench.device.state(), DeviceState::Off);
    assert_eq!(bench.loader.stops(), 1);
    assert_eq!(bench.power.count("power_off"), 1);
}

#[test]
fn test_other_session_keeps_device_up() {
    let bench = TestBench::new();
    let keeper = bench.booted_session();
    let leaver = bench.booted_session();
    assert_eq!(bench.loader.starts(), 1);

    drop(leaver);
    assert_eq!(bench.device.state(), DeviceState::Ready);
    assert_eq!(bench.loader.stops(), 0);
    assert!(keeper.execute(&generic(), WAIT).unwrap().is_ok());

    drop(keeper);
    assert_eq!(bench.device.state(), DeviceState::Off);
}

#[test]
fn test_session_limit() {
    let bench = TestBench::build(
        quick_mailbox_config(),
        quick_ipcq_config(),
        DeviceConfig { max_sessions: 2 },
    );
    let first = bench.device.open_session().unwrap();
    let _second = bench.device.open_session().unwrap();
    assert_eq!(
        bench.device.open_session().unwrap_err(),
        SessionError::TooManySessions { max: 2 }
    );

    drop(first);
    let third = bench.device.open_session().unwrap();
    assert!(third.id() > 2);
}

#[test]
fn test_session_statistics() {
    let bench = TestBench::new();
    let session = bench.booted_session();
    bench.emulator.script(&[
        Behavior::Echo,
        Behavior::Fault(CmdType::UnknownNotify),
        Behavior::Hold,
    ]);

    assert!(session.execute(&generic(), WAIT).unwrap().is_ok());
    let completion = session.execute(&generic(), WAIT).unwrap();
    assert!(matches!(completion.kind, CompletionKind::Error(_)));

    let ticket = session.send_command(&generic()).unwrap();
    assert_eq!(
        session.wait_response(&ticket, SHORT_WAIT).unwrap_err(),
        SessionError::Ipcq(IpcqError::Timeout)
    );
    assert_eq!(session.info().outstanding, 1);
    assert!(wait_until(WAIT, || bench.emulator.held_count() == 1));
    bench.emulator.release_held();
    assert!(session.wait_response_default(&ticket).unwrap().is_ok());

    let info = session.info();
    assert_eq!(info.stats.commands_sent, 3);
    assert_eq!(info.stats.responses_received, 3);
    assert_eq!(info.stats.error_responses, 1);
    assert_eq!(info.stats.wait_timeouts, 1);
    assert_eq!(info.outstanding, 0);
    assert!(info.last_activity >= info.opened_at);
}

#[test]
fn test_tickets_belong_to_their_session() {
    let bench = TestBench::new();
    let owner = bench.booted_session();
    let stranger = bench.booted_session();
    bench.emulator.set_behavior(Behavior::Hold);

    let ticket = owner.send_command(&generic()).unwrap();
    assert_eq!(
        stranger.wait_response(&ticket, SHORT_WAIT).unwrap_err(),
        SessionError::Ipcq(IpcqError::UnknownTicket(ticket.id()))
    );
    assert!(!stranger.abandon(&ticket));
    assert!(owner.abandon(&ticket));
    assert_eq!(bench.ipcq.outstanding(), 0);
}

#[test]
fn test_silence_counted_per_session() {
    let bench = TestBench::new();
    let session = bench.booted_session();
    bench.emulator.script(&[Behavior::Silent]);

    let command = generic().with_watchdog(coproc_host_osal::Duration::from_millis(20));
    let completion = session.execute(&command, WAIT).unwrap();
    assert_eq!(completion.kind, CompletionKind::CoprocessorSilent);
    assert_eq!(session.info().stats.coprocessor_silences, 1);
    assert_eq!(bench.device.status().error_count, 1);
}

#[test]
fn test_ticket_from_previous_boot_never_matches() {
    let bench = TestBench::new();
    let first = bench.booted_session();
    let second = bench.booted_session();

    bench.emulator.script(&[Behavior::Silent]);
    let old = first.send_command(&generic()).unwrap();

    first.release_boot().unwrap();
    second.release_boot().unwrap();
    assert!(!bench.device.is_booted());
    second.acquire_boot(&TestBench::firmware()).unwrap();

    let fresh = second
        .send_command(&generic().with_params(&[0xbbbb]))
        .unwrap();
    // Request ids restart at boot; only the epoch tells the tickets apart
    assert_eq!(fresh.id(), old.id());
    assert_ne!(fresh.epoch(), old.epoch());
    assert!(!bench.ipcq.is_current(&old));
    assert_eq!(first.info().outstanding, 0);

    assert_eq!(
        first.wait_response(&old, SHORT_WAIT).unwrap_err(),
        SessionError::Ipcq(IpcqError::Cancelled)
    );
    assert!(!first.abandon(&old));

    let completion = second.wait_response(&fresh, WAIT).unwrap();
    assert_eq!(completion.kind, CompletionKind::Done);
    assert_eq!(completion.results[0], 0xbbbb);
}

#[test]
fn test_concurrent_sessions_balance_power() {
    let bench = TestBench::new();
    let device = Arc::clone(&bench.device);

    let workers: Vec<_> = (0..4u32)
        .map(|worker| {
            let device = Arc::clone(&device);
            std::thread::spawn(move || {
                for round in 0..5u32 {
                    let session = device.open_session().unwrap();
                    session.acquire_power().unwrap();
                    session.acquire_boot(&TestBench::firmware()).unwrap();
                    let tag = (worker << 8) | round;
                    let completion = session
                        .execute(&generic().with_params(&[tag]), WAIT)
                        .unwrap();
                    assert_eq!(completion.results[0], tag);
                    session.release_boot().unwrap();
                    session.release_power().unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(bench.device.state(), DeviceState::Off);
    assert_eq!(bench.power.count("power_on"), bench.power.count("power_off"));
    assert_eq!(bench.loader.starts(), bench.loader.stops());
    let status = bench.device.status();
    assert_eq!(status.power_refs, 0);
    assert_eq!(status.boot_refs, 0);
    assert_eq!(status.sessions, 0);
}
