//! Ride session state machine.
//!
//! [`RideSession`] owns the live statistics of the ride in progress. It
//! starts and stops the sensor streams, gates samples by state, persists
//! status changes through the [`SessionStore`] and publishes every change to
//! the live projection.
//!
//! The session is not thread-safe on purpose: one owner drives it. In
//! production that owner is the runtime thread in `recording::runtime`.

use crate::recording::aggregator::TelemetryAggregator;
use crate::recording::clock::Clock;
use crate::recording::types::{
    LiveRideStats, RideId, RideRecord, RideStatus, SessionError, SessionEvent, SessionState,
};
use crate::sensors::bio::BioStream;
use crate::sensors::geo::GeoStream;
use crate::sensors::impact::{CrashDetector, ImpactEvent, ImpactMonitor};
use crate::sensors::types::{sample_channel, SampleEvent, SampleSink, SensorError};
use crate::storage::database::DatabaseError;
use crate::storage::store::SessionStore;
use chrono::{DateTime, Utc};
use crossbeam::channel::Receiver;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Cancel and purge every Active or Paused record.
///
/// Only valid when no live session is attached to the store: any such
/// record is then left over from an unclean shutdown.
pub fn recover_orphans(store: &dyn SessionStore) -> Result<usize, DatabaseError> {
    let cancelled = store.cancel_unfinished()?;
    store.delete_where(RideStatus::Cancelled)?;
    if cancelled > 0 {
        tracing::warn!("Recovered {} orphaned ride(s)", cancelled);
    }
    Ok(cancelled)
}

/// The ride being recorded.
#[derive(Debug, Clone, Copy)]
struct CurrentRide {
    id: RideId,
    started_at: DateTime<Utc>,
}

/// Session state machine over injected streams and store.
pub struct RideSession {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    geo: GeoStream,
    impact: ImpactMonitor,
    bio: Option<Arc<BioStream>>,
    sink: SampleSink,
    samples: Receiver<SampleEvent>,
    aggregator: TelemetryAggregator,
    state: SessionState,
    current: Option<CurrentRide>,
    stats_tx: watch::Sender<Arc<LiveRideStats>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl RideSession {
    /// Create an idle session.
    ///
    /// The session owns its sample channel: streams push into
    /// [`RideSession::sample_sink`] and whoever drives the session feeds
    /// [`RideSession::sample_receiver`] into [`RideSession::dispatch`].
    pub fn new(
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        geo: GeoStream,
        impact: ImpactMonitor,
        crash: CrashDetector,
    ) -> Self {
        let (sink, samples) = sample_channel();
        let (stats_tx, _) = watch::channel(Arc::new(LiveRideStats::default()));
        let (events_tx, _) = broadcast::channel(64);
        Self {
            store,
            clock,
            geo,
            impact,
            bio: None,
            sink,
            samples,
            aggregator: TelemetryAggregator::new(crash),
            state: SessionState::Idle,
            current: None,
            stats_tx,
            events_tx,
        }
    }

    /// Feed heart rate and power from a BLE stream while a ride is live.
    pub fn with_bio_stream(mut self, bio: Arc<BioStream>) -> Self {
        self.bio = Some(bio);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id of the live ride, if any.
    pub fn current_ride_id(&self) -> Option<RideId> {
        self.current.map(|ride| ride.id)
    }

    /// Current live statistics.
    pub fn stats(&self) -> &LiveRideStats {
        self.aggregator.stats()
    }

    /// Subscribe to published live statistics snapshots.
    pub fn watch_stats(&self) -> watch::Receiver<Arc<LiveRideStats>> {
        self.stats_tx.subscribe()
    }

    /// Subscribe to state, crash and failure events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SessionEvent> {
        self.events_tx.clone()
    }

    /// Producer side of the sample channel this session consumes.
    pub fn sample_sink(&self) -> SampleSink {
        self.sink.clone()
    }

    /// Consumer side of the sample channel.
    pub fn sample_receiver(&self) -> Receiver<SampleEvent> {
        self.samples.clone()
    }

    /// Drop samples queued before the current phase began.
    fn discard_pending_samples(&self) {
        let stale = self.samples.try_iter().count();
        if stale > 0 {
            tracing::debug!("Discarded {} stale sample(s)", stale);
        }
    }

    /// Whether a crash was detected within the debounce window.
    pub fn is_crash_active(&self) -> bool {
        self.aggregator.is_crash_active(self.clock.now())
    }

    fn publish(&self) {
        self.stats_tx
            .send_replace(Arc::new(self.aggregator.stats().clone()));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn transition(&mut self, state: SessionState) {
        self.state = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    fn storage_warning(&self, action: &str, error: &DatabaseError) {
        tracing::warn!("Failed to persist {}: {}", action, error);
        self.emit(SessionEvent::StorageFailed(format!("{}: {}", action, error)));
    }

    /// Cancel and purge orphaned records, unless a session is live.
    pub fn recover_orphans(&self) -> Result<usize, SessionError> {
        if self.state.is_live() {
            return Ok(0);
        }
        Ok(recover_orphans(self.store.as_ref())?)
    }

    /// Start a new ride and return its id.
    pub fn start(&mut self) -> Result<RideId, SessionError> {
        if self.state.is_live() {
            return Err(SessionError::AlreadyActive);
        }

        self.recover_orphans()?;
        self.discard_pending_samples();

        let now = self.clock.now();
        let id = self.store.create(&RideRecord::new_active(now))?;

        if let Err(e) = self.geo.start(self.sink.clone()) {
            match e {
                SensorError::HardwareUnavailable(reason) => {
                    tracing::warn!("Riding without location: {}", reason);
                    self.emit(SessionEvent::SensorUnavailable(format!("location: {}", reason)));
                }
                other => {
                    tracing::error!("Location stream failed to start: {}", other);
                    if let Err(db) = self.store.delete(id) {
                        tracing::warn!("Failed to remove aborted ride {}: {}", id, db);
                    }
                    return Err(other.into());
                }
            }
        }

        if let Err(e) = self.impact.start(self.sink.clone()) {
            tracing::warn!("Riding without crash detection: {}", e);
            self.emit(SessionEvent::SensorUnavailable(format!("accelerometer: {}", e)));
        }

        if let Some(bio) = &self.bio {
            bio.attach_sink(self.sink.clone());
        }

        self.aggregator.begin(now);
        self.current = Some(CurrentRide {
            id,
            started_at: now,
        });
        self.transition(SessionState::Active);
        self.publish();

        tracing::info!("Started ride {}", id);
        Ok(id)
    }

    fn persist_status(&self, status: RideStatus) {
        let Some(ride) = self.current else {
            return;
        };
        let result = self.store.read(ride.id).and_then(|record| match record {
            Some(mut record) => {
                record.status = status;
                self.store.update(&record)
            }
            None => Err(DatabaseError::NotFound(format!("ride {}", ride.id))),
        });
        if let Err(e) = result {
            self.storage_warning(&format!("{} status", status), &e);
        }
    }

    /// Pause the ride. Returns false unless it was active.
    pub fn pause(&mut self) -> Result<bool, SessionError> {
        if self.state != SessionState::Active {
            return Ok(false);
        }

        self.geo.stop();
        self.discard_pending_samples();
        self.aggregator.pause(self.clock.now());
        self.transition(SessionState::Paused);
        self.persist_status(RideStatus::Paused);
        self.publish();

        tracing::info!("Paused ride");
        Ok(true)
    }

    /// Resume the ride. Returns false unless it was paused.
    pub fn resume(&mut self) -> Result<bool, SessionError> {
        if self.state != SessionState::Paused {
            return Ok(false);
        }

        self.aggregator.resume(self.clock.now());
        if let Err(e) = self.geo.start(self.sink.clone()) {
            tracing::warn!("Location stream failed to restart: {}", e);
            self.emit(SessionEvent::SensorUnavailable(format!("location: {}", e)));
        }
        self.transition(SessionState::Active);
        self.persist_status(RideStatus::Active);
        self.publish();

        tracing::info!("Resumed ride");
        Ok(true)
    }

    /// The record `finish` would persist right now.
    pub fn preview_record(&self) -> Result<RideRecord, SessionError> {
        let ride = self.current.ok_or(SessionError::NoActiveSession)?;
        let now = self.clock.now();
        let mut record = RideRecord::new_active(ride.started_at);
        record.id = ride.id;
        record.complete_with(&self.aggregator.final_snapshot(now), now);
        Ok(record)
    }

    fn halt_streams(&mut self) {
        self.geo.stop();
        self.impact.stop();
        if let Some(bio) = &self.bio {
            bio.detach_sink();
        }
        self.discard_pending_samples();
    }

    fn clear(&mut self, state: SessionState) {
        self.halt_streams();
        self.aggregator.reset();
        self.current = None;
        self.transition(state);
        self.publish();
    }

    /// Finish the ride and persist it as completed.
    ///
    /// Returns false when no ride is live or its record has vanished from
    /// the store. On a storage error the ride stays live so finishing can
    /// be retried.
    pub fn finish(&mut self) -> Result<bool, SessionError> {
        let Some(ride) = self.current.filter(|_| self.state.is_live()) else {
            return Ok(false);
        };

        let now = self.clock.now();
        let Some(mut record) = self.store.read(ride.id)? else {
            tracing::warn!("Ride {} missing from store, discarding session", ride.id);
            self.clear(SessionState::Cancelled);
            return Ok(false);
        };

        let snapshot = self.aggregator.final_snapshot(now);
        record.complete_with(&snapshot, now);
        if let Err(e) = self.store.update(&record) {
            tracing::error!("Failed to save ride {}: {}", ride.id, e);
            self.emit(SessionEvent::StorageFailed(format!("finish: {}", e)));
            return Err(e.into());
        }

        self.clear(SessionState::Completed);
        tracing::info!(
            "Finished ride {}: {:.2} km in {}",
            ride.id,
            record.distance_km,
            record.formatted_duration()
        );
        Ok(true)
    }

    /// Discard the ride. Returns false unless a ride was live.
    pub fn cancel(&mut self) -> Result<bool, SessionError> {
        if !self.state.is_live() {
            return Ok(false);
        }

        self.halt_streams();
        self.persist_status(RideStatus::Cancelled);
        if let Err(e) = self.store.delete_where(RideStatus::Cancelled) {
            self.storage_warning("cancelled ride purge", &e);
        }

        let id = self.current_ride_id();
        self.clear(SessionState::Cancelled);
        tracing::info!("Cancelled ride {:?}", id);
        Ok(true)
    }

    /// Advance duration and calories. No-op unless active.
    pub fn tick(&mut self) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        let applied = self.aggregator.tick(self.clock.now()).is_some();
        if applied {
            self.publish();
        }
        applied
    }

    /// Apply one sample. Returns whether it changed anything.
    pub fn dispatch(&mut self, event: SampleEvent) -> bool {
        let applied = match event {
            SampleEvent::Position(sample) => {
                self.aggregator.on_position_sample(&sample).is_some()
            }
            SampleEvent::HeartRate(bpm) => self.aggregator.on_heart_rate_sample(bpm).is_some(),
            SampleEvent::Power(watts) => self.aggregator.on_power_sample(watts).is_some(),
            SampleEvent::Impact(sample) => {
                match self
                    .aggregator
                    .on_impact_sample(sample.net_force, sample.timestamp)
                {
                    Some(ImpactEvent::Crash { net_force, at }) => {
                        self.emit(SessionEvent::CrashDetected { net_force, at });
                    }
                    Some(ImpactEvent::HighImpact { net_force, at }) => {
                        self.emit(SessionEvent::HighImpact { net_force, at });
                    }
                    None => {}
                }
                // Impacts never change the live stats
                return false;
            }
        };
        if applied {
            self.publish();
        }
        applied
    }
}

impl Drop for RideSession {
    fn drop(&mut self) {
        self.halt_streams();
        if self.state.is_live() {
            tracing::warn!("Session dropped while a ride was live; it will be recovered on restart");
        }
    }
}
