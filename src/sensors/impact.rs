//! Accelerometer stream and crash classification.
//!
//! [`ImpactMonitor`] reduces raw 3-axis readings to a gravity-compensated
//! net force and forwards it to the session. [`CrashDetector`] decides
//! whether a given net force is a crash, a high impact, or nothing.

use crate::sensors::types::{ImpactSample, SampleEvent, SampleSink, SensorError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: f64 = 9.806_65;

/// Default crash threshold (net force, m/s²).
pub const DEFAULT_CRASH_THRESHOLD: f64 = 25.0;

/// Default suppression window between crash events.
pub const DEFAULT_DEBOUNCE_MS: i64 = 3000;

/// Default fraction of the crash threshold that counts as a high impact.
pub const DEFAULT_HIGH_IMPACT_RATIO: f64 = 0.6;

/// 3D vector for accelerometer readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    /// X-axis component (left-right)
    pub x: f32,
    /// Y-axis component (up-down)
    pub y: f32,
    /// Z-axis component (forward-backward)
    pub z: f32,
}

impl Vector3 {
    /// Create a new vector with specified components.
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Calculate the magnitude (length) of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Raw accelerometer reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelReading {
    /// Acceleration including gravity, m/s²
    pub acceleration: Vector3,
    /// Capture time
    pub timestamp: DateTime<Utc>,
}

impl AccelReading {
    /// Net force with gravity removed.
    pub fn net_force(&self) -> f64 {
        f64::from(self.acceleration.magnitude()) - STANDARD_GRAVITY
    }
}

/// Callback invoked by an accelerometer for every reading.
pub type AccelCallback = Box<dyn Fn(AccelReading) + Send + Sync>;

/// Platform accelerometer.
pub trait Accelerometer: Send {
    /// Whether the device has an accelerometer at all.
    fn is_available(&self) -> bool;

    /// Begin delivering readings to `on_reading`.
    fn register(&mut self, on_reading: AccelCallback) -> Result<(), SensorError>;

    /// Stop delivering readings.
    fn unregister(&mut self);
}

/// Classified impact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImpactEvent {
    /// Net force above the crash threshold
    Crash {
        net_force: f64,
        at: DateTime<Utc>,
    },
    /// Net force between the high-impact ratio and the crash threshold
    HighImpact {
        net_force: f64,
        at: DateTime<Utc>,
    },
}

/// Threshold classification with crash debounce.
#[derive(Debug, Clone)]
pub struct CrashDetector {
    threshold: f64,
    high_impact_ratio: f64,
    debounce: Duration,
    last_crash: Option<DateTime<Utc>>,
}

impl Default for CrashDetector {
    fn default() -> Self {
        Self::new(
            DEFAULT_CRASH_THRESHOLD,
            DEFAULT_DEBOUNCE_MS,
            DEFAULT_HIGH_IMPACT_RATIO,
        )
    }
}

impl CrashDetector {
    pub fn new(threshold: f64, debounce_ms: i64, high_impact_ratio: f64) -> Self {
        Self {
            threshold,
            high_impact_ratio,
            debounce: Duration::milliseconds(debounce_ms.max(0)),
            last_crash: None,
        }
    }

    /// Classify one net-force sample.
    ///
    /// A crash within the debounce window of the previous crash yields
    /// nothing. High impacts are never debounced.
    pub fn classify(&mut self, net_force: f64, at: DateTime<Utc>) -> Option<ImpactEvent> {
        if net_force > self.threshold {
            let debounced = self
                .last_crash
                .map(|last| at - last <= self.debounce)
                .unwrap_or(false);
            if debounced {
                tracing::debug!("Crash at {:.1} suppressed by debounce", net_force);
                return None;
            }
            self.last_crash = Some(at);
            tracing::warn!("Crash detected: net force {:.1} m/s²", net_force);
            Some(ImpactEvent::Crash { net_force, at })
        } else if net_force > self.threshold * self.high_impact_ratio {
            tracing::info!("High impact: net force {:.1} m/s²", net_force);
            Some(ImpactEvent::HighImpact { net_force, at })
        } else {
            None
        }
    }

    /// Whether a crash happened within the debounce window before `now`.
    pub fn is_crash_active(&self, now: DateTime<Utc>) -> bool {
        self.last_crash
            .map(|last| now - last < self.debounce)
            .unwrap_or(false)
    }

    /// Forget the last crash.
    pub fn reset(&mut self) {
        self.last_crash = None;
    }
}

/// Accelerometer stream feeding the session.
pub struct ImpactMonitor {
    accelerometer: Box<dyn Accelerometer>,
    running: Arc<AtomicBool>,
}

impl ImpactMonitor {
    pub fn new(accelerometer: Box<dyn Accelerometer>) -> Self {
        Self {
            accelerometer,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start forwarding net-force samples into `sink`.
    pub fn start(&mut self, sink: SampleSink) -> Result<(), SensorError> {
        if self.is_running() {
            return Ok(());
        }
        if !self.accelerometer.is_available() {
            return Err(SensorError::HardwareUnavailable(
                "no accelerometer".to_string(),
            ));
        }

        let gate = Arc::new(AtomicBool::new(true));
        let callback_gate = gate.clone();
        self.accelerometer.register(Box::new(move |reading| {
            if callback_gate.load(Ordering::Acquire) {
                sink.send(SampleEvent::Impact(ImpactSample {
                    net_force: reading.net_force(),
                    timestamp: reading.timestamp,
                }));
            }
        }))?;
        self.running = gate;

        tracing::info!("Crash monitoring started");
        Ok(())
    }

    /// Stop forwarding samples. Idempotent.
    pub fn stop(&mut self) {
        if self.running.swap(false, Ordering::AcqRel) {
            self.accelerometer.unregister();
            tracing::info!("Crash monitoring stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for ImpactMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct ManualAccelState {
    callback: Option<AccelCallback>,
    unavailable: bool,
}

/// In-process accelerometer driven by [`ManualAccelerometer::push`].
#[derive(Clone, Default)]
pub struct ManualAccelerometer {
    state: Arc<Mutex<ManualAccelState>>,
}

impl ManualAccelerometer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device without an accelerometer.
    pub fn unavailable() -> Self {
        let accel = Self::default();
        accel.lock().unavailable = true;
        accel
    }

    /// Deliver a reading. Returns false if nobody is registered.
    pub fn push(&self, reading: AccelReading) -> bool {
        let state = self.lock();
        match &state.callback {
            Some(callback) => {
                callback(reading);
                true
            }
            None => false,
        }
    }

    /// Deliver a reading whose net force equals `net_force`.
    pub fn push_net_force(&self, net_force: f64, at: DateTime<Utc>) -> bool {
        let magnitude = (net_force + STANDARD_GRAVITY) as f32;
        self.push(AccelReading {
            acceleration: Vector3::new(0.0, magnitude, 0.0),
            timestamp: at,
        })
    }

    pub fn is_registered(&self) -> bool {
        self.lock().callback.is_some()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualAccelState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Accelerometer for ManualAccelerometer {
    fn is_available(&self) -> bool {
        !self.lock().unavailable
    }

    fn register(&mut self, on_reading: AccelCallback) -> Result<(), SensorError> {
        self.lock().callback = Some(on_reading);
        Ok(())
    }

    fn unregister(&mut self) {
        self.lock().callback = None;
    }
}
