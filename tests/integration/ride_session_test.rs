//! Integration tests for the ride session state machine.

use crate::fixtures::{t0, Rig};
use chrono::Duration;
use ridetrack::recording::types::{RideStatus, SessionError, SessionEvent, SessionState};
use ridetrack::sensors::geo::ManualLocationProvider;
use ridetrack::sensors::impact::ManualAccelerometer;
use ridetrack::sensors::types::{SampleEvent, SensorError};
use ridetrack::storage::store::SessionStore;
use std::sync::atomic::Ordering;

fn drain_events(
    rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_start_creates_active_record() {
    let mut rig = Rig::new();
    let id = rig.session.start().unwrap();

    assert_eq!(rig.session.state(), SessionState::Active);
    assert_eq!(rig.session.current_ride_id(), Some(id));
    assert!(rig.location.is_active());
    assert!(rig.accel.is_registered());

    let record = rig.store.read(id).unwrap().unwrap();
    assert_eq!(record.status, RideStatus::Active);
    assert_eq!(record.started_at, t0());

    let stats = rig.session.watch_stats().borrow().clone();
    assert!(stats.is_recording);
    assert_eq!(stats.started_at, Some(t0()));
}

#[test]
fn test_start_while_active_is_rejected() {
    let mut rig = Rig::new();
    rig.session.start().unwrap();

    assert!(matches!(
        rig.session.start(),
        Err(SessionError::AlreadyActive)
    ));

    rig.session.pause().unwrap();
    assert!(matches!(
        rig.session.start(),
        Err(SessionError::AlreadyActive)
    ));
    assert_eq!(rig.store.all().len(), 1);
}

#[test]
fn test_pause_and_resume_account_paused_time() {
    let mut rig = Rig::new();
    let id = rig.session.start().unwrap();

    rig.advance_secs(10);
    assert!(rig.session.pause().unwrap());
    assert_eq!(
        rig.store.read(id).unwrap().unwrap().status,
        RideStatus::Paused
    );
    assert!(!rig.location.is_active());

    rig.advance_secs(30);
    assert!(rig.session.resume().unwrap());
    assert!(rig.location.is_active());
    assert_eq!(rig.session.stats().paused_duration_ms, 30_000);

    rig.advance_secs(20);
    assert!(rig.session.finish().unwrap());

    let record = rig.store.read(id).unwrap().unwrap();
    assert_eq!(record.status, RideStatus::Completed);
    assert_eq!(record.duration_ms, 60_000);
    assert_eq!(record.paused_duration_ms, 30_000);
    assert_eq!(record.active_duration_ms(), 30_000);
    assert_eq!(record.ended_at, Some(t0() + Duration::seconds(60)));
}

#[test]
fn test_redundant_transitions_are_noops() {
    let mut rig = Rig::new();
    assert!(!rig.session.pause().unwrap());
    assert!(!rig.session.resume().unwrap());
    assert!(!rig.session.finish().unwrap());
    assert!(!rig.session.cancel().unwrap());

    rig.session.start().unwrap();
    assert!(!rig.session.resume().unwrap());
    assert!(rig.session.pause().unwrap());
    assert!(!rig.session.pause().unwrap());
    assert_eq!(rig.session.state(), SessionState::Paused);
}

#[test]
fn test_finish_twice() {
    let mut rig = Rig::new();
    rig.session.start().unwrap();
    rig.advance_secs(5);

    assert!(rig.session.finish().unwrap());
    assert!(!rig.session.finish().unwrap());
    assert_eq!(rig.session.state(), SessionState::Completed);
    assert_eq!(rig.store.all().len(), 1);
}

#[test]
fn test_finish_while_paused_folds_open_pause() {
    let mut rig = Rig::new();
    let id = rig.session.start().unwrap();

    rig.advance_secs(20);
    rig.session.pause().unwrap();
    rig.advance_secs(40);
    rig.session.finish().unwrap();

    let record = rig.store.read(id).unwrap().unwrap();
    assert_eq!(record.duration_ms, 60_000);
    assert_eq!(record.paused_duration_ms, 40_000);
    assert_eq!(record.status, RideStatus::Completed);
}

#[test]
fn test_finish_resets_live_stats() {
    let mut rig = Rig::new();
    let stats = rig.session.watch_stats();
    rig.session.start().unwrap();
    rig.advance_secs(5);
    rig.session.finish().unwrap();

    assert!(!stats.borrow().is_recording);
    assert_eq!(rig.session.current_ride_id(), None);
    assert!(!rig.location.is_active());
    assert!(!rig.accel.is_registered());
}

#[test]
fn test_cancel_removes_record() {
    let mut rig = Rig::new();
    let id = rig.session.start().unwrap();
    rig.advance_secs(30);

    assert!(rig.session.cancel().unwrap());
    assert_eq!(rig.session.state(), SessionState::Cancelled);
    assert!(rig.store.read(id).unwrap().is_none());
    assert!(rig.store.all().is_empty());
    assert!(!rig.location.is_active());
}

#[test]
fn test_start_recovers_orphans() {
    use ridetrack::recording::types::RideRecord;

    let mut rig = Rig::new();
    let orphan = rig
        .store
        .create(&RideRecord::new_active(t0() - Duration::days(1)))
        .unwrap();
    let mut completed = RideRecord::new_active(t0() - Duration::days(2));
    completed.status = RideStatus::Completed;
    let kept = rig.store.create(&completed).unwrap();

    let id = rig.session.start().unwrap();

    assert!(rig.store.read(orphan).unwrap().is_none());
    assert!(rig.store.read(kept).unwrap().is_some());
    assert_eq!(rig.store.read_active().unwrap().unwrap().id, id);
}

#[test]
fn test_storage_failure_on_create_starts_nothing() {
    let mut rig = Rig::new();
    rig.store.fail_create.store(true, Ordering::SeqCst);

    assert!(matches!(
        rig.session.start(),
        Err(SessionError::StorageFailure(_))
    ));
    assert_eq!(rig.session.state(), SessionState::Idle);
    assert!(!rig.location.is_active());
    assert!(!rig.accel.is_registered());
}

#[test]
fn test_location_permission_denied_leaves_no_record() {
    let mut rig = Rig::with_sensors(ManualLocationProvider::denied(), ManualAccelerometer::new());

    assert!(matches!(
        rig.session.start(),
        Err(SessionError::Sensor(SensorError::PermissionDenied))
    ));
    assert_eq!(rig.session.state(), SessionState::Idle);
    assert!(rig.store.all().is_empty());
    assert!(!rig.accel.is_registered());
}

#[test]
fn test_missing_sensors_degrade_the_ride() {
    let mut rig = Rig::with_sensors(
        ManualLocationProvider::unavailable(),
        ManualAccelerometer::unavailable(),
    );
    let mut events = rig.session.subscribe();

    rig.session.start().unwrap();
    assert_eq!(rig.session.state(), SessionState::Active);

    let unavailable = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::SensorUnavailable(_)))
        .count();
    assert_eq!(unavailable, 2);
}

#[test]
fn test_positions_accumulate_distance() {
    let mut rig = Rig::new();
    let id = rig.session.start().unwrap();

    assert!(rig.fix(0.0, 0.0));
    rig.advance_secs(120);
    assert!(rig.fix(0.01, 0.0));
    assert_eq!(rig.drain(), 2);

    let stats = rig.session.stats();
    assert!((stats.distance_km - 1.112).abs() < 0.001);
    assert_eq!(stats.route_points.len(), 2);

    rig.session.finish().unwrap();
    let record = rig.store.read(id).unwrap().unwrap();
    assert_eq!(record.route_points.len(), 2);
    assert!((record.distance_km - 1.112).abs() < 0.001);
    // 1.112 km over 2 minutes of active time
    assert!((record.average_speed_kmh - 33.36).abs() < 0.05);
}

#[test]
fn test_positions_ignored_while_paused() {
    let mut rig = Rig::new();
    rig.session.start().unwrap();
    rig.fix(0.0, 0.0);
    rig.drain();

    rig.session.pause().unwrap();
    // The stream is stopped, so the provider has nowhere to deliver
    assert!(!rig.fix(0.5, 0.0));

    // A sample queued before the pause is still rejected by state
    assert!(!rig
        .session
        .dispatch(SampleEvent::Position(ridetrack::sensors::types::PositionSample {
            latitude: 0.5,
            longitude: 0.0,
            timestamp: t0(),
            speed_kmh: None,
            altitude_m: None,
        })));

    assert_eq!(rig.session.stats().route_points.len(), 1);
    assert_eq!(rig.session.stats().distance_km, 0.0);
}

#[test]
fn test_first_fix_after_resume_measures_from_last_fix() {
    let mut rig = Rig::new();
    rig.session.start().unwrap();
    rig.fix(0.0, 0.0);
    rig.drain();

    rig.session.pause().unwrap();
    rig.advance_secs(60);
    rig.session.resume().unwrap();
    rig.fix(0.01, 0.0);
    rig.drain();

    assert!((rig.session.stats().distance_km - 1.112).abs() < 0.001);
}

#[test]
fn test_heart_rate_counts_while_paused() {
    let mut rig = Rig::new();
    rig.session.start().unwrap();
    rig.session.pause().unwrap();

    assert!(rig.session.dispatch(SampleEvent::HeartRate(140)));
    assert!(rig.session.dispatch(SampleEvent::Power(180)));

    let stats = rig.session.stats();
    assert_eq!(stats.average_heart_rate, 140);
    assert_eq!(stats.max_heart_rate, 140);
    assert_eq!(stats.current_power, 180);
}

#[test]
fn test_samples_ignored_when_idle() {
    let mut rig = Rig::new();
    assert!(!rig.session.dispatch(SampleEvent::HeartRate(140)));
    assert!(!rig.session.tick());
    assert_eq!(rig.session.stats().average_heart_rate, 0);
}

#[test]
fn test_tick_publishes_calories() {
    let mut rig = Rig::new();
    let stats = rig.session.watch_stats();
    rig.session.start().unwrap();
    rig.session.dispatch(SampleEvent::HeartRate(155));

    rig.advance_secs(600);
    assert!(rig.session.tick());

    let snapshot = stats.borrow().clone();
    assert_eq!(snapshot.duration_ms, 600_000);
    // 155 bpm is in the 16 cal/min bracket
    assert_eq!(snapshot.calories, 160);
}

#[test]
fn test_crash_and_high_impact_events() {
    let mut rig = Rig::new();
    let mut events = rig.session.subscribe();
    rig.session.start().unwrap();

    assert!(rig.accel.push_net_force(30.0, rig.clock_now()));
    assert!(rig.accel.push_net_force(18.0, rig.clock_now()));
    assert!(rig.accel.push_net_force(31.0, rig.clock_now()));
    rig.drain();

    let impacts: Vec<SessionEvent> = drain_events(&mut events)
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                SessionEvent::CrashDetected { .. } | SessionEvent::HighImpact { .. }
            )
        })
        .collect();
    assert_eq!(impacts.len(), 2);
    assert!(matches!(impacts[0], SessionEvent::CrashDetected { .. }));
    assert!(matches!(impacts[1], SessionEvent::HighImpact { .. }));
    assert!(rig.session.is_crash_active());

    rig.advance_secs(3);
    assert!(!rig.session.is_crash_active());
}

#[test]
fn test_state_change_events() {
    let mut rig = Rig::new();
    let mut events = rig.session.subscribe();

    rig.session.start().unwrap();
    rig.session.pause().unwrap();
    rig.session.resume().unwrap();
    rig.session.cancel().unwrap();

    let states: Vec<SessionState> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged(state) => Some(state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            SessionState::Active,
            SessionState::Paused,
            SessionState::Active,
            SessionState::Cancelled,
        ]
    );
}

#[test]
fn test_finish_failure_keeps_session_for_retry() {
    let mut rig = Rig::new();
    let id = rig.session.start().unwrap();
    rig.advance_secs(30);

    rig.store.fail_updates(true);
    assert!(matches!(
        rig.session.finish(),
        Err(SessionError::StorageFailure(_))
    ));
    assert_eq!(rig.session.state(), SessionState::Active);
    assert_eq!(rig.session.current_ride_id(), Some(id));

    rig.store.fail_updates(false);
    assert!(rig.session.finish().unwrap());
    assert_eq!(
        rig.store.read(id).unwrap().unwrap().status,
        RideStatus::Completed
    );
}

#[test]
fn test_pause_storage_failure_is_reported_not_fatal() {
    let mut rig = Rig::new();
    let mut events = rig.session.subscribe();
    let id = rig.session.start().unwrap();

    rig.store.fail_updates(true);
    assert!(rig.session.pause().unwrap());
    assert_eq!(rig.session.state(), SessionState::Paused);
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, SessionEvent::StorageFailed(_))));

    // The stored status lags behind
    assert_eq!(
        rig.store.read(id).unwrap().unwrap().status,
        RideStatus::Active
    );
}

#[test]
fn test_finish_with_vanished_record() {
    let mut rig = Rig::new();
    let id = rig.session.start().unwrap();
    rig.store.delete(id).unwrap();

    assert!(!rig.session.finish().unwrap());
    assert!(!rig.session.state().is_live());
}

#[test]
fn test_preview_record() {
    let mut rig = Rig::new();
    assert!(matches!(
        rig.session.preview_record(),
        Err(SessionError::NoActiveSession)
    ));

    let id = rig.session.start().unwrap();
    rig.session.dispatch(SampleEvent::HeartRate(130));
    rig.advance_secs(90);

    let preview = rig.session.preview_record().unwrap();
    assert_eq!(preview.id, id);
    assert_eq!(preview.duration_ms, 90_000);
    assert_eq!(preview.average_heart_rate, 130);
    assert_eq!(preview.status, RideStatus::Completed);

    // Nothing was written
    assert_eq!(
        rig.store.read(id).unwrap().unwrap().status,
        RideStatus::Active
    );
    assert_eq!(rig.session.state(), SessionState::Active);
}

#[test]
fn test_new_ride_after_finish() {
    let mut rig = Rig::new();
    let first = rig.session.start().unwrap();
    rig.advance_secs(10);
    rig.session.finish().unwrap();

    rig.advance_secs(10);
    let second = rig.session.start().unwrap();
    assert_ne!(first, second);
    assert_eq!(rig.session.stats().distance_km, 0.0);
    assert_eq!(rig.session.stats().started_at, Some(t0() + Duration::seconds(20)));
}

#[test]
fn test_samples_queued_at_finish_do_not_reach_next_ride() {
    let mut rig = Rig::new();
    rig.session.start().unwrap();
    assert!(rig.fix(52.0, 4.0));
    assert!(rig.session.sample_sink().send(SampleEvent::HeartRate(150)));
    assert!(rig.session.finish().unwrap());

    rig.advance_secs(3600);
    rig.session.start().unwrap();
    assert_eq!(rig.drain(), 0);

    let stats = rig.session.stats();
    assert_eq!(stats.started_at, Some(t0() + Duration::hours(1)));
    assert!(stats.route_points.is_empty());
    assert_eq!(stats.average_heart_rate, 0);
}

#[test]
fn test_samples_queued_at_cancel_are_discarded() {
    let mut rig = Rig::new();
    rig.session.start().unwrap();
    rig.fix(52.0, 4.0);
    rig.session.cancel().unwrap();

    assert!(rig.samples.is_empty());
    rig.session.start().unwrap();
    assert!(rig.session.stats().route_points.is_empty());
}

#[test]
fn test_fix_queued_before_pause_is_not_applied_after_resume() {
    let mut rig = Rig::new();
    rig.session.start().unwrap();
    rig.fix(0.0, 0.0);
    rig.drain();

    rig.advance_secs(10);
    rig.fix(0.01, 0.0);
    rig.session.pause().unwrap();
    rig.advance_secs(60);
    rig.session.resume().unwrap();
    assert_eq!(rig.drain(), 0);

    let stats = rig.session.stats();
    assert_eq!(stats.route_points.len(), 1);
    assert_eq!(stats.distance_km, 0.0);
}
