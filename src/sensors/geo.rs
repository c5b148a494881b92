//! Location stream.
//!
//! Wraps a [`LocationProvider`] and turns its raw fixes into
//! [`PositionSample`]s on the session's [`SampleSink`].

use crate::sensors::types::{
    LocationRequest, PositionSample, SampleEvent, SampleSink, SensorError,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Conversion factor from m/s to km/h.
const MPS_TO_KMH: f64 = 3.6;

/// A fix as reported by the platform location service.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: DateTime<Utc>,
    /// Speed in m/s, when the provider reports one
    pub speed_mps: Option<f32>,
    /// Altitude in meters, when the provider reports one
    pub altitude_m: Option<f64>,
}

impl RawLocation {
    /// Create a fix without speed or altitude.
    pub fn new(latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            latitude,
            longitude,
            timestamp,
            speed_mps: None,
            altitude_m: None,
        }
    }

    /// Set the reported speed in m/s.
    pub fn with_speed(mut self, speed_mps: f32) -> Self {
        self.speed_mps = Some(speed_mps);
        self
    }

    /// Set the reported altitude in meters.
    pub fn with_altitude(mut self, altitude_m: f64) -> Self {
        self.altitude_m = Some(altitude_m);
        self
    }
}

/// Callback invoked by a provider for every fix.
pub type LocationCallback = Box<dyn Fn(RawLocation) + Send + Sync>;

/// Platform location service.
pub trait LocationProvider: Send {
    /// Whether location access has been granted.
    fn has_permission(&self) -> bool;

    /// Begin delivering fixes to `on_fix`.
    fn request_updates(
        &mut self,
        request: &LocationRequest,
        on_fix: LocationCallback,
    ) -> Result<(), SensorError>;

    /// Stop delivering fixes.
    fn remove_updates(&mut self);
}

/// Convert a raw fix into a position sample.
///
/// Missing or non-finite speed and altitude become `None`.
pub fn classify(raw: &RawLocation) -> PositionSample {
    PositionSample {
        latitude: raw.latitude,
        longitude: raw.longitude,
        timestamp: raw.timestamp,
        speed_kmh: raw
            .speed_mps
            .filter(|s| s.is_finite())
            .map(|s| f64::from(s) * MPS_TO_KMH),
        altitude_m: raw.altitude_m.filter(|a| a.is_finite()),
    }
}

/// Location stream feeding the session.
pub struct GeoStream {
    provider: Box<dyn LocationProvider>,
    request: LocationRequest,
    /// Cleared on stop so late callbacks are dropped
    running: Arc<AtomicBool>,
}

impl GeoStream {
    /// Create a stream over the given provider.
    pub fn new(provider: Box<dyn LocationProvider>, request: LocationRequest) -> Self {
        Self {
            provider,
            request,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start delivering position samples into `sink`.
    pub fn start(&mut self, sink: SampleSink) -> Result<(), SensorError> {
        if self.is_running() {
            return Ok(());
        }
        if !self.provider.has_permission() {
            tracing::warn!("Location permission not granted");
            return Err(SensorError::PermissionDenied);
        }

        // Fresh gate per start: a stale callback from a previous start
        // still holds the old, cleared flag.
        let gate = Arc::new(AtomicBool::new(true));
        let callback_gate = gate.clone();
        let on_fix: LocationCallback = Box::new(move |raw| {
            if callback_gate.load(Ordering::Acquire) {
                sink.send(SampleEvent::Position(classify(&raw)));
            }
        });

        self.provider.request_updates(&self.request, on_fix)?;
        self.running = gate;

        tracing::info!(
            "Location updates started (interval {} ms, min distance {} m)",
            self.request.interval_ms,
            self.request.min_distance_m
        );
        Ok(())
    }

    /// Stop delivering samples. Idempotent.
    pub fn stop(&mut self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.provider.remove_updates();
            tracing::info!("Location updates stopped");
        }
    }

    /// Whether the stream is currently delivering samples.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for GeoStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct ManualLocationState {
    callback: Option<LocationCallback>,
    denied: bool,
    unavailable: bool,
    last_request: Option<LocationRequest>,
}

/// In-process location provider driven by [`ManualLocationProvider::push`].
///
/// Used for simulation and tests. Clones share state, so one clone can be
/// handed to a [`GeoStream`] while another feeds fixes.
#[derive(Clone, Default)]
pub struct ManualLocationProvider {
    state: Arc<Mutex<ManualLocationState>>,
}

impl ManualLocationProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider whose permission has not been granted.
    pub fn denied() -> Self {
        let provider = Self::default();
        provider.lock().denied = true;
        provider
    }

    /// A provider with no location hardware.
    pub fn unavailable() -> Self {
        let provider = Self::default();
        provider.lock().unavailable = true;
        provider
    }

    /// Deliver a fix. Returns false if updates are not currently requested.
    pub fn push(&self, raw: RawLocation) -> bool {
        let state = self.lock();
        match &state.callback {
            Some(callback) => {
                callback(raw);
                true
            }
            None => false,
        }
    }

    /// Whether a consumer has requested updates.
    pub fn is_active(&self) -> bool {
        self.lock().callback.is_some()
    }

    /// The most recent request passed to `request_updates`.
    pub fn last_request(&self) -> Option<LocationRequest> {
        self.lock().last_request
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualLocationState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl LocationProvider for ManualLocationProvider {
    fn has_permission(&self) -> bool {
        !self.lock().denied
    }

    fn request_updates(
        &mut self,
        request: &LocationRequest,
        on_fix: LocationCallback,
    ) -> Result<(), SensorError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(SensorError::HardwareUnavailable(
                "no location provider".to_string(),
            ));
        }
        state.callback = Some(on_fix);
        state.last_request = Some(*request);
        Ok(())
    }

    fn remove_updates(&mut self) {
        self.lock().callback = None;
    }
}
