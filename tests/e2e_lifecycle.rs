//! E2E tests for session lifecycle, teardown and failure propagation

use ringsync::backend::sim::{Direction, SimConfig, SimEvent, SimFaults, SimProbe, SimulatedBackend};
use ringsync::{Backend, BackendError, BufferPhase, DeviceSession, ManualClock, SessionError};
use std::sync::Arc;

const CAP: usize = 8192;
const GAP: usize = 1764;

fn session() -> (DeviceSession, ManualClock, SimProbe) {
    let clock = ManualClock::new(Some(176_400));
    let backend = SimulatedBackend::new(Arc::new(clock.clone()), SimConfig::default());
    let probe = backend.probe();
    let session = DeviceSession::new(Backend::new(backend), Arc::new(clock.clone()));
    (session, clock, probe)
}

fn full_session() -> (DeviceSession, ManualClock, SimProbe) {
    let (mut session, clock, probe) = session();
    session.init();
    session.init_output_device(None).unwrap();
    session.init_output_buffer(44100, 2, CAP).unwrap();
    session.init_input_device(None).unwrap();
    session.init_input_buffer(44100, 2, CAP).unwrap();
    (session, clock, probe)
}

#[test]
fn test_full_lifecycle() {
    let (mut session, clock, probe) = full_session();
    session.start_output().unwrap();
    session.start_input().unwrap();
    assert_eq!(session.output_phase(), BufferPhase::Running);
    assert_eq!(session.input_phase(), BufferPhase::Running);

    clock.advance_ticks(2048);
    let space = session.query_output_space().unwrap();
    session.write_block(&vec![0u8; space]).unwrap();
    let filled = session.query_input_filled().unwrap();
    session.read_block(&mut vec![0u8; filled]).unwrap();

    session.stop_output().unwrap();
    session.stop_input().unwrap();
    session.term();

    assert_eq!(session.output_phase(), BufferPhase::Released);
    assert_eq!(probe.live_buffers(), 0);
    assert_eq!(probe.live_devices(), 0);
}

#[test]
fn test_term_twice_is_noop() {
    let (mut session, _, probe) = full_session();
    session.start_output().unwrap();
    session.term();
    let events = probe.events();
    session.term();
    assert_eq!(probe.events(), events);
}

#[test]
fn test_term_releases_buffers_before_devices() {
    let (mut session, _, probe) = full_session();
    session.start_output().unwrap();
    session.start_input().unwrap();
    session.term();

    let events = probe.events();
    let position = |event: &SimEvent| events.iter().position(|e| e == event).unwrap();
    assert!(
        position(&SimEvent::Stop(Direction::Output))
            < position(&SimEvent::BufferReleased(Direction::Output))
    );
    assert!(
        position(&SimEvent::BufferReleased(Direction::Input))
            < position(&SimEvent::DeviceReleased(Direction::Input))
    );
    assert!(
        position(&SimEvent::DeviceReleased(Direction::Input))
            < position(&SimEvent::DeviceReleased(Direction::Output))
    );
}

#[test]
fn test_drop_terminates_session() {
    let (session, _, probe) = full_session();
    assert_eq!(probe.live_buffers(), 2);
    drop(session);
    assert_eq!(probe.live_buffers(), 0);
    assert_eq!(probe.live_devices(), 0);
}

#[test]
fn test_operations_outside_live_phases_are_contract_violations() {
    let (mut session, _, _) = session();
    assert!(matches!(
        session.query_output_filled(),
        Err(SessionError::ContractViolation { .. })
    ));
    assert!(matches!(
        session.zero_empty_space(),
        Err(SessionError::ContractViolation { .. })
    ));
    assert!(matches!(
        session.start_output(),
        Err(SessionError::ContractViolation { .. })
    ));
    assert!(matches!(
        session.query_input_filled(),
        Err(SessionError::ContractViolation { .. })
    ));
    assert!(matches!(
        session.get_input_status(),
        Err(SessionError::ContractViolation { .. })
    ));

    let (mut session, _, _) = full_session();
    session.term();
    assert!(matches!(
        session.write_block(&[0; 4]),
        Err(SessionError::ContractViolation { .. })
    ));
    assert!(matches!(
        session.get_output_status(),
        Err(SessionError::ContractViolation { .. })
    ));
}

#[test]
fn test_unavailable_backend_reports_device_unavailable() {
    let mut session = DeviceSession::new(
        Backend::Unavailable {
            reason: "audio subsystem missing".to_string(),
        },
        Arc::new(ManualClock::new(Some(176_400))),
    );
    assert!(matches!(
        session.init_output_device(None),
        Err(SessionError::DeviceUnavailable(_))
    ));
    assert!(matches!(
        session.init_input_device(None),
        Err(SessionError::DeviceUnavailable(_))
    ));
    session.term();
    let stats = session.stats();
    assert_eq!(stats.backend, "unavailable");
    assert!(stats.output.is_none());
}

#[test]
fn test_missing_driver_reports_device_unavailable() {
    let (mut session, _, probe) = session();
    probe.set_faults(SimFaults {
        no_devices: true,
        ..Default::default()
    });
    assert!(matches!(
        session.init_output_device(None),
        Err(SessionError::DeviceUnavailable(BackendError::Unavailable))
    ));
    assert!(matches!(
        session.init_output_device(Some("No Such Device")),
        Err(SessionError::DeviceUnavailable(_))
    ));
}

#[test]
fn test_named_device_selection() {
    let (mut session, _, _) = session();
    session.init_output_device(Some("Simulated Device")).unwrap();
    assert!(session.init_input_device(Some("Other Device")).is_err());
}

#[test]
fn test_busy_start_propagates_and_caller_may_retry() {
    let (mut session, _, probe) = full_session();
    probe.update_faults(|f| f.busy_on_play = true);

    let err = session.start_output().unwrap_err();
    assert!(matches!(err, SessionError::DeviceBusy { .. }));
    assert!(!err.is_retriable());
    assert_eq!(session.output_phase(), BufferPhase::Initialized);

    probe.update_faults(|f| f.busy_on_play = false);
    session.start_output().unwrap();
    assert_eq!(session.output_phase(), BufferPhase::Running);
}

#[test]
fn test_lock_race_is_retriable_after_requery() {
    let (mut session, clock, probe) = full_session();
    session.start_output().unwrap();
    clock.advance_ticks(1024);

    let space = session.query_output_space().unwrap();
    probe.update_faults(|f| f.lock_races = 1);
    let err = session.write_block(&vec![0u8; space]).unwrap_err();
    assert!(err.is_retriable());
    assert!(matches!(err, SessionError::LockFailed { .. }));

    let space = session.query_output_space().unwrap();
    assert_eq!(session.write_block(&vec![0u8; space]).unwrap(), space);
}

#[test]
fn test_driver_failure_surfaces_unchanged() {
    let (mut session, _, probe) = full_session();
    probe.update_faults(|f| f.fail_position = true);
    match session.query_output_space() {
        Err(SessionError::Driver { op, source }) => {
            assert_eq!(op, "get_current_position");
            assert_eq!(source, BackendError::Driver("position unavailable".into()));
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[test]
fn test_buffer_creation_failure() {
    let (mut session, _, probe) = session();
    session.init_output_device(None).unwrap();
    probe.update_faults(|f| f.fail_create_buffer = true);
    assert!(matches!(
        session.init_output_buffer(44100, 2, CAP),
        Err(SessionError::BufferCreationFailed(_))
    ));
    assert_eq!(session.output_phase(), BufferPhase::Uninitialized);
}

#[test]
fn test_failed_reinit_drops_back_to_uninitialized() {
    let (mut session, clock, probe) = full_session();
    session.start_output().unwrap();
    clock.advance_ticks(1024);
    session.stop_output().unwrap();

    probe.update_faults(|f| f.fail_create_buffer = true);
    assert!(matches!(
        session.init_output_buffer(44100, 2, 4096),
        Err(SessionError::BufferCreationFailed(_))
    ));
    assert_eq!(session.output_phase(), BufferPhase::Uninitialized);
    assert!(session.output_state().is_none());
    let stats = session.stats();
    assert_eq!(stats.output_phase, BufferPhase::Uninitialized);
    assert!(stats.output.is_none());
    // The input side is untouched
    assert_eq!(session.input_phase(), BufferPhase::Initialized);

    probe.update_faults(|f| f.fail_create_buffer = false);
    session.init_output_buffer(44100, 2, 4096).unwrap();
    assert_eq!(session.output_phase(), BufferPhase::Initialized);
}

#[test]
fn test_term_stops_only_running_buffers() {
    let (mut session, _, probe) = full_session();
    session.start_output().unwrap();
    session.term();

    let events = probe.events();
    assert!(events.contains(&SimEvent::Stop(Direction::Output)));
    assert!(!events.contains(&SimEvent::Stop(Direction::Input)));
    assert!(events.contains(&SimEvent::BufferReleased(Direction::Input)));
}

#[test]
fn test_restart_rewinds_playback() {
    let (mut session, clock, _) = full_session();
    session.zero_empty_space().unwrap();
    session.start_output().unwrap();
    clock.advance_ticks(3000);
    session.query_output_space().unwrap();
    assert_eq!(session.frames_played(), 750);

    session.stop_output().unwrap();
    assert!(!session.get_output_status().unwrap().active);

    session.start_output().unwrap();
    assert_eq!(session.frames_played(), 0);
    let status = session.get_output_status().unwrap();
    assert!(status.active && status.looping);
    assert!(!status.buffer_lost);
}

#[test]
fn test_stopped_buffer_resyncs_without_counting() {
    let (mut session, _, _) = full_session();
    // Never started: space stays pinned behind the driver gap
    for _ in 0..3 {
        assert_eq!(session.query_output_space().unwrap(), CAP - GAP);
    }
    assert_eq!(session.output_underflow_count(), 0);
}

#[test]
fn test_stats_snapshot_after_underflow() {
    let (mut session, clock, _) = full_session();
    session.zero_empty_space().unwrap();
    session.start_output().unwrap();
    clock.advance_ticks(2 * CAP as u64);
    session.query_output_space().unwrap();

    let stats = session.stats();
    assert_eq!(stats.underflow_count(), 2);
    assert_eq!(stats.output_phase, BufferPhase::Running);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["output"]["underflow_count"], 2);
    assert_eq!(json["input_phase"], "initialized");
}

#[test]
fn test_reinit_after_term() {
    let (mut session, _, probe) = full_session();
    session.term();
    session.init();
    assert_eq!(session.output_phase(), BufferPhase::Uninitialized);

    session.init_output_device(None).unwrap();
    session.init_output_buffer(48000, 1, 4800).unwrap();
    assert_eq!(session.output_state().unwrap().frame_size(), 2);
    assert_eq!(probe.live_buffers(), 1);
}
