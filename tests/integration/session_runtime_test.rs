//! Integration tests for the session thread and its handle.

use crate::fixtures::{build_session, t0, FlakyStore};
use chrono::Duration as ChronoDuration;
use ridetrack::recording::clock::ManualClock;
use ridetrack::recording::runtime::SessionHandle;
use ridetrack::recording::types::{
    LiveRideStats, RideStatus, SessionError, SessionEvent, SessionState,
};
use ridetrack::sensors::geo::{ManualLocationProvider, RawLocation};
use ridetrack::sensors::impact::ManualAccelerometer;
use ridetrack::sensors::types::SampleEvent;
use ridetrack::storage::store::SessionStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Harness {
    handle: SessionHandle,
    clock: Arc<ManualClock>,
    location: ManualLocationProvider,
    store: Arc<FlakyStore>,
}

fn spawn() -> Harness {
    let store = Arc::new(FlakyStore::new());
    let location = ManualLocationProvider::new();
    let accel = ManualAccelerometer::new();
    let (session, _samples, clock) = build_session(store.clone(), &location, &accel);
    let handle = SessionHandle::spawn(session, Duration::from_millis(10)).unwrap();
    Harness {
        handle,
        clock,
        location,
        store,
    }
}

/// Poll the live stats until `predicate` holds or two seconds pass.
fn wait_for(handle: &SessionHandle, predicate: impl Fn(&LiveRideStats) -> bool) -> bool {
    let stats = handle.live_stats();
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if predicate(&stats.borrow()) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn test_lifecycle_through_handle() {
    let h = spawn();

    let id = h.handle.start().unwrap();
    assert_eq!(h.handle.state().unwrap(), SessionState::Active);
    assert!(h.handle.live_stats().borrow().is_recording);

    h.clock.advance(ChronoDuration::seconds(10));
    assert!(h.handle.pause().unwrap());
    h.clock.advance(ChronoDuration::seconds(30));
    assert!(h.handle.resume().unwrap());
    h.clock.advance(ChronoDuration::seconds(20));
    assert!(h.handle.finish().unwrap());

    let record = h.store.read(id).unwrap().unwrap();
    assert_eq!(record.status, RideStatus::Completed);
    assert_eq!(record.duration_ms, 60_000);
    assert_eq!(record.paused_duration_ms, 30_000);

    h.handle.shutdown();
}

#[test]
fn test_errors_cross_the_thread() {
    let h = spawn();
    h.handle.start().unwrap();

    assert!(matches!(
        h.handle.start(),
        Err(SessionError::AlreadyActive)
    ));
    h.handle.cancel().unwrap();
    assert!(matches!(
        h.handle.preview_record(),
        Err(SessionError::NoActiveSession)
    ));

    h.handle.shutdown();
}

#[test]
fn test_samples_reach_live_stats() {
    let h = spawn();
    h.handle.start().unwrap();

    assert!(h.handle.sample_sink().send(SampleEvent::HeartRate(142)));
    assert!(wait_for(&h.handle, |s| s.current_heart_rate == 142));

    assert!(h.location.push(RawLocation::new(45.0, 7.0, t0()).with_speed(5.0)));
    assert!(wait_for(&h.handle, |s| s.route_points.len() == 1));
    assert!((h.handle.live_stats().borrow().current_speed_kmh - 18.0).abs() < 1e-4);

    h.handle.shutdown();
}

#[test]
fn test_ticker_runs_only_while_active() {
    let h = spawn();
    h.handle.start().unwrap();

    h.clock.advance(ChronoDuration::minutes(5));
    assert!(wait_for(&h.handle, |s| s.duration_ms == 300_000));

    h.handle.pause().unwrap();
    h.clock.advance(ChronoDuration::minutes(5));
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(h.handle.live_stats().borrow().duration_ms, 300_000);

    h.handle.resume().unwrap();
    h.clock.advance(ChronoDuration::minutes(1));
    assert!(wait_for(&h.handle, |s| s.duration_ms == 660_000));
    assert_eq!(h.handle.live_stats().borrow().paused_duration_ms, 300_000);

    h.handle.shutdown();
}

#[test]
fn test_events_are_published() {
    let h = spawn();
    let mut events = h.handle.subscribe_events();

    h.handle.start().unwrap();
    h.handle.finish().unwrap();

    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::StateChanged(SessionState::Active)
    );
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::StateChanged(SessionState::Completed)
    );

    h.handle.shutdown();
}

#[test]
fn test_shutdown_leaves_live_ride_for_recovery() {
    let h = spawn();
    let id = h.handle.start().unwrap();
    let clone = h.handle.clone();

    h.handle.shutdown();
    assert!(matches!(clone.start(), Err(SessionError::RuntimeStopped)));
    assert!(matches!(clone.state(), Err(SessionError::RuntimeStopped)));
    assert!(!h.location.is_active());

    let orphan = h.store.read(id).unwrap().unwrap();
    assert_eq!(orphan.status, RideStatus::Active);
    assert_eq!(
        ridetrack::recording::session::recover_orphans(h.store.as_ref()).unwrap(),
        1
    );
    assert!(h.store.read(id).unwrap().is_none());

    // A second shutdown is harmless
    clone.shutdown();
}
