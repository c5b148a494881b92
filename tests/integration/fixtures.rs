//! Shared test rig: a session wired to in-process sensors, a manual clock
//! and an in-memory store that can be told to fail.

use chrono::{DateTime, TimeZone, Utc};
use crossbeam::channel::Receiver;
use ridetrack::recording::clock::{Clock, ManualClock};
use ridetrack::recording::session::RideSession;
use ridetrack::recording::types::{RideId, RideRecord, RideStatus};
use ridetrack::sensors::geo::{GeoStream, ManualLocationProvider, RawLocation};
use ridetrack::sensors::impact::{CrashDetector, ImpactMonitor, ManualAccelerometer};
use ridetrack::sensors::types::{LocationRequest, SampleEvent};
use ridetrack::storage::database::{Database, DatabaseError};
use ridetrack::storage::store::{RideStatistics, SessionStore, StartTimeOrder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

/// In-memory store with switchable write failures.
pub struct FlakyStore {
    inner: Database,
    pub fail_create: AtomicBool,
    pub fail_update: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: Database::open_in_memory().unwrap(),
            fail_create: AtomicBool::new(false),
            fail_update: AtomicBool::new(false),
        }
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }

    /// Every record regardless of status.
    pub fn all(&self) -> Vec<RideRecord> {
        [
            RideStatus::Active,
            RideStatus::Paused,
            RideStatus::Completed,
            RideStatus::Cancelled,
        ]
        .into_iter()
        .flat_map(|status| {
            self.inner
                .list(status, None, StartTimeOrder::OldestFirst)
                .unwrap()
        })
        .collect()
    }

    fn injected(what: &str) -> DatabaseError {
        DatabaseError::QueryFailed(format!("injected {} failure", what))
    }
}

impl SessionStore for FlakyStore {
    fn create(&self, record: &RideRecord) -> Result<RideId, DatabaseError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Self::injected("create"));
        }
        self.inner.create(record)
    }

    fn read(&self, id: RideId) -> Result<Option<RideRecord>, DatabaseError> {
        self.inner.read(id)
    }

    fn read_active(&self) -> Result<Option<RideRecord>, DatabaseError> {
        self.inner.read_active()
    }

    fn update(&self, record: &RideRecord) -> Result<(), DatabaseError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(Self::injected("update"));
        }
        self.inner.update(record)
    }

    fn delete(&self, id: RideId) -> Result<(), DatabaseError> {
        self.inner.delete(id)
    }

    fn delete_where(&self, status: RideStatus) -> Result<usize, DatabaseError> {
        self.inner.delete_where(status)
    }

    fn cancel_unfinished(&self) -> Result<usize, DatabaseError> {
        self.inner.cancel_unfinished()
    }

    fn list(
        &self,
        status: RideStatus,
        limit: Option<usize>,
        order: StartTimeOrder,
    ) -> Result<Vec<RideRecord>, DatabaseError> {
        self.inner.list(status, limit, order)
    }

    fn statistics(&self) -> Result<RideStatistics, DatabaseError> {
        self.inner.statistics()
    }
}

/// A session with every collaborator exposed to the test.
pub struct Rig {
    pub session: RideSession,
    pub samples: Receiver<SampleEvent>,
    pub clock: Arc<ManualClock>,
    pub location: ManualLocationProvider,
    pub accel: ManualAccelerometer,
    pub store: Arc<FlakyStore>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_sensors(ManualLocationProvider::new(), ManualAccelerometer::new())
    }

    pub fn with_sensors(location: ManualLocationProvider, accel: ManualAccelerometer) -> Self {
        let store = Arc::new(FlakyStore::new());
        let (session, samples, clock) = build_session(store.clone(), &location, &accel);
        Self {
            session,
            samples,
            clock,
            location,
            accel,
            store,
        }
    }

    /// Move the clock forward by `secs` seconds.
    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Deliver a fix stamped with the current clock time.
    pub fn fix(&self, latitude: f64, longitude: f64) -> bool {
        self.location
            .push(RawLocation::new(latitude, longitude, self.clock_now()))
    }

    /// Apply every queued sample to the session.
    pub fn drain(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.samples.try_recv() {
            if self.session.dispatch(event) {
                applied += 1;
            }
        }
        applied
    }
}

/// Build a session over the given sensors, starting the clock at [`t0`].
pub fn build_session(
    store: Arc<dyn SessionStore>,
    location: &ManualLocationProvider,
    accel: &ManualAccelerometer,
) -> (RideSession, Receiver<SampleEvent>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let session = RideSession::new(
        store,
        clock.clone(),
        GeoStream::new(Box::new(location.clone()), LocationRequest::default()),
        ImpactMonitor::new(Box::new(accel.clone())),
        CrashDetector::default(),
    );
    let samples = session.sample_receiver();
    (session, samples, clock)
}
