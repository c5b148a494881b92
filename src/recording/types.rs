//! Ride record, live statistics and session types.

use crate::metrics::calculator::speed_kmh;
use crate::sensors::types::SensorError;
use crate::storage::database::DatabaseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Store-assigned ride identifier.
pub type RideId = i64;

/// Lifecycle status of a persisted ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideStatus {
    /// Being recorded
    Active,
    /// Recording paused
    Paused,
    /// Finished and kept
    Completed,
    /// Abandoned, pending purge
    Cancelled,
}

impl RideStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RideStatus::Active => "ACTIVE",
            RideStatus::Paused => "PAUSED",
            RideStatus::Completed => "COMPLETED",
            RideStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parse the storage representation. Unknown text reads as `Cancelled`
    /// so a corrupt row is purged rather than resurrected.
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "ACTIVE" => RideStatus::Active,
            "PAUSED" => RideStatus::Paused,
            "COMPLETED" => RideStatus::Completed,
            _ => RideStatus::Cancelled,
        }
    }

    /// Active or Paused.
    pub fn is_unfinished(&self) -> bool {
        matches!(self, RideStatus::Active | RideStatus::Paused)
    }
}

impl std::fmt::Display for RideStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RideStatus::Active => write!(f, "Active"),
            RideStatus::Paused => write!(f, "Paused"),
            RideStatus::Completed => write!(f, "Completed"),
            RideStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// One point of the recorded route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub latitude: f64,
    pub longitude: f64,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Speed in km/h at this point
    pub speed_kmh: Option<f64>,
    /// Altitude in meters
    pub altitude_m: Option<f64>,
}

/// A persisted ride.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RideRecord {
    /// Store-assigned id, 0 until created
    pub id: RideId,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time (set on completion)
    pub ended_at: Option<DateTime<Utc>>,
    /// Elapsed time in milliseconds, pauses included
    pub duration_ms: i64,
    /// Time spent paused in milliseconds
    pub paused_duration_ms: i64,
    /// Distance in kilometers
    pub distance_km: f64,
    /// Average speed over active time in km/h
    pub average_speed_kmh: f64,
    /// Maximum speed in km/h
    pub max_speed_kmh: f64,
    /// Estimated calories
    pub calories: u32,
    /// Blended average heart rate (0 when no data)
    pub average_heart_rate: u16,
    /// Maximum heart rate
    pub max_heart_rate: u16,
    /// Recorded route
    pub route_points: Vec<RoutePoint>,
    /// Lifecycle status
    pub status: RideStatus,
}

impl RideRecord {
    /// A fresh record in `Active` status.
    pub fn new_active(started_at: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            started_at,
            ended_at: None,
            duration_ms: 0,
            paused_duration_ms: 0,
            distance_km: 0.0,
            average_speed_kmh: 0.0,
            max_speed_kmh: 0.0,
            calories: 0,
            average_heart_rate: 0,
            max_heart_rate: 0,
            route_points: Vec::new(),
            status: RideStatus::Active,
        }
    }

    /// Copy the final figures of a session into this record and mark it
    /// `Completed`.
    pub fn complete_with(&mut self, stats: &LiveRideStats, ended_at: DateTime<Utc>) {
        self.ended_at = Some(ended_at);
        self.duration_ms = stats.duration_ms;
        self.paused_duration_ms = stats.paused_duration_ms;
        self.distance_km = stats.distance_km;
        self.average_speed_kmh = stats.average_speed_kmh();
        self.max_speed_kmh = stats.max_speed_kmh;
        self.calories = stats.calories;
        self.average_heart_rate = stats.average_heart_rate;
        self.max_heart_rate = stats.max_heart_rate;
        self.route_points = stats.route_points.clone();
        self.status = RideStatus::Completed;
    }

    /// Elapsed time minus paused time.
    pub fn active_duration_ms(&self) -> i64 {
        (self.duration_ms - self.paused_duration_ms).max(0)
    }

    /// Active duration as `m:ss` or `h:mm:ss`.
    pub fn formatted_duration(&self) -> String {
        format_duration_ms(self.active_duration_ms())
    }
}

/// Live projection of the running session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LiveRideStats {
    /// A session is running (active or paused)
    pub is_recording: bool,
    /// The session is paused
    pub is_paused: bool,
    /// Session start time
    pub started_at: Option<DateTime<Utc>>,
    /// Current speed in km/h
    pub current_speed_kmh: f64,
    /// Maximum speed in km/h
    pub max_speed_kmh: f64,
    /// Cumulative distance in kilometers
    pub distance_km: f64,
    /// Elapsed time in milliseconds
    pub duration_ms: i64,
    /// Paused time in milliseconds
    pub paused_duration_ms: i64,
    /// Calorie estimate
    pub calories: u32,
    /// Last heart rate sample
    pub current_heart_rate: u16,
    /// Blended average heart rate
    pub average_heart_rate: u16,
    /// Maximum heart rate
    pub max_heart_rate: u16,
    /// Last power sample in watts
    pub current_power: u16,
    /// Route so far
    pub route_points: Vec<RoutePoint>,
}

impl LiveRideStats {
    /// Elapsed time minus paused time.
    pub fn active_duration_ms(&self) -> i64 {
        (self.duration_ms - self.paused_duration_ms).max(0)
    }

    /// Distance over active time, 0 when no active time has passed.
    pub fn average_speed_kmh(&self) -> f64 {
        speed_kmh(self.distance_km, self.active_duration_ms())
    }

    /// Active duration as `m:ss` or `h:mm:ss`.
    pub fn formatted_duration(&self) -> String {
        format_duration_ms(self.active_duration_ms())
    }
}

/// Format milliseconds as `m:ss`, or `h:mm:ss` from one hour up.
pub fn format_duration_ms(ms: i64) -> String {
    let total_secs = ms.max(0) / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Session state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No session
    #[default]
    Idle,
    /// Recording
    Active,
    /// Recording paused
    Paused,
    /// Last session finished
    Completed,
    /// Last session cancelled
    Cancelled,
}

impl SessionState {
    /// Active or Paused.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Active | SessionState::Paused)
    }
}

/// Events published by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// State machine transition
    StateChanged(SessionState),
    /// Net force above the crash threshold
    CrashDetected {
        net_force: f64,
        at: DateTime<Utc>,
    },
    /// Net force in the high-impact band
    HighImpact {
        net_force: f64,
        at: DateTime<Utc>,
    },
    /// A sensor stream could not be started; the ride continues without it
    SensorUnavailable(String),
    /// A mid-ride persistence write failed
    StorageFailed(String),
}

/// Errors returned by session commands.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("A ride is already in progress")]
    AlreadyActive,

    #[error("No ride in progress")]
    NoActiveSession,

    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Storage failure: {0}")]
    StorageFailure(#[from] DatabaseError),

    #[error("Session runtime has stopped")]
    RuntimeStopped,
}
