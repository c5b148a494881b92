//! Sensor types shared by the location, BLE and accelerometer streams.
//!
//! Every stream hands its readings to a [`SampleSink`] as a [`SampleEvent`];
//! the session runtime is the only consumer.

use chrono::{DateTime, Utc};
use crossbeam::channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified type of a BLE peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    /// Heart rate monitor (0x180D)
    HeartRateMonitor,
    /// Cycling power meter (0x1818)
    CyclingPowerSensor,
    /// Cycling speed/cadence sensor (0x1816)
    CyclingSpeedCadenceSensor,
    /// Nothing we know how to read
    #[default]
    Unknown,
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::HeartRateMonitor => write!(f, "Heart Rate Monitor"),
            DeviceType::CyclingPowerSensor => write!(f, "Power Meter"),
            DeviceType::CyclingSpeedCadenceSensor => write!(f, "Speed/Cadence"),
            DeviceType::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A discovered or connected BLE peripheral.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BleDevice {
    /// Advertised name, if any
    pub name: Option<String>,
    /// Hardware address (unique key)
    pub address: String,
    /// Classified device type
    pub device_type: DeviceType,
    /// Whether a connection is currently established
    pub connected: bool,
    /// Signal strength (RSSI)
    pub rssi: Option<i16>,
}

impl BleDevice {
    /// Name to show for the device.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown Device")
    }
}

/// Position fix in the shape the aggregator consumes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSample {
    /// Latitude in degrees
    pub latitude: f64,
    /// Longitude in degrees
    pub longitude: f64,
    /// Capture time reported by the provider
    pub timestamp: DateTime<Utc>,
    /// Provider-reported speed in km/h
    pub speed_kmh: Option<f64>,
    /// Altitude in meters
    pub altitude_m: Option<f64>,
}

/// Net force reading from the accelerometer, gravity removed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpactSample {
    /// `|a| - g` in m/s²
    pub net_force: f64,
    /// Capture time
    pub timestamp: DateTime<Utc>,
}

/// Typed message delivered from a sensor stream to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleEvent {
    /// Location fix
    Position(PositionSample),
    /// Heart rate in bpm
    HeartRate(u16),
    /// Instantaneous power in watts
    Power(u16),
    /// Accelerometer net force
    Impact(ImpactSample),
}

/// Producer side of the sample channel.
///
/// Sending never blocks; samples are dropped once the consumer is gone.
#[derive(Debug, Clone)]
pub struct SampleSink {
    tx: Sender<SampleEvent>,
}

impl SampleSink {
    /// Hand a sample to the consumer. Returns false if nobody is listening.
    pub fn send(&self, event: SampleEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Create a connected sink/receiver pair.
pub fn sample_channel() -> (SampleSink, Receiver<SampleEvent>) {
    let (tx, rx) = crossbeam::channel::unbounded();
    (SampleSink { tx }, rx)
}

/// Location request parameters handed to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationRequest {
    /// Desired update interval in milliseconds
    pub interval_ms: u64,
    /// Fastest accepted update interval in milliseconds
    pub min_interval_ms: u64,
    /// Maximum batching delay in milliseconds
    pub max_delay_ms: u64,
    /// Minimum displacement between updates in meters
    pub min_distance_m: f32,
}

impl Default for LocationRequest {
    fn default() -> Self {
        Self {
            interval_ms: 500,
            min_interval_ms: 100,
            max_delay_ms: 1000,
            min_distance_m: 1.0,
        }
    }
}

/// Configuration for the BLE stream.
#[derive(Debug, Clone)]
pub struct SensorConfig {
    /// How long a scan runs before it stops itself, in seconds
    pub scan_timeout_secs: u64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 10,
        }
    }
}

/// Errors that can occur in the sensor system.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    /// Location or Bluetooth access not granted
    #[error("Sensor permission denied")]
    PermissionDenied,

    /// No adapter, accelerometer or location provider present
    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// Failed to start or stop BLE scanning
    #[error("Failed to scan: {0}")]
    ScanFailed(String),

    /// No peripheral with the given address
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Connection to a peripheral failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to subscribe to notifications
    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    /// Generic BLE error
    #[error("BLE error: {0}")]
    BleError(String),
}
