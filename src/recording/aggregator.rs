//! Telemetry aggregation.
//!
//! Folds position, heart-rate, power and impact samples into one
//! [`LiveRideStats`]. Each fold is gated by the stopwatch phase: positions
//! only count while running, biometrics while running or paused, impacts
//! always. Folds return `None` when the sample was not applied.

use crate::metrics::calculator::{
    blend_heart_rate, estimate_calories, haversine_km, is_valid_coordinate, speed_kmh,
};
use crate::recording::stopwatch::Stopwatch;
use crate::recording::types::{LiveRideStats, RoutePoint};
use crate::sensors::impact::{CrashDetector, ImpactEvent};
use crate::sensors::types::PositionSample;
use chrono::{DateTime, Utc};

/// Last accepted position, kept across pauses.
#[derive(Debug, Clone, Copy)]
struct LastFix {
    latitude: f64,
    longitude: f64,
    timestamp: DateTime<Utc>,
}

/// Folds sensor samples into live ride statistics.
#[derive(Debug, Clone, Default)]
pub struct TelemetryAggregator {
    stats: LiveRideStats,
    stopwatch: Stopwatch,
    last_fix: Option<LastFix>,
    crash: CrashDetector,
}

impl TelemetryAggregator {
    pub fn new(crash: CrashDetector) -> Self {
        Self {
            crash,
            ..Default::default()
        }
    }

    /// Current statistics.
    pub fn stats(&self) -> &LiveRideStats {
        &self.stats
    }

    pub fn stopwatch(&self) -> &Stopwatch {
        &self.stopwatch
    }

    /// Reset and start timing a new session at `now`.
    pub fn begin(&mut self, now: DateTime<Utc>) -> &LiveRideStats {
        self.stats = LiveRideStats {
            is_recording: true,
            started_at: Some(now),
            ..Default::default()
        };
        self.stopwatch = Stopwatch::started(now);
        self.last_fix = None;
        &self.stats
    }

    /// Freeze motion figures at `now`.
    pub fn pause(&mut self, now: DateTime<Utc>) -> Option<&LiveRideStats> {
        if !self.stopwatch.pause(now) {
            return None;
        }
        self.stats.is_paused = true;
        Some(&self.stats)
    }

    /// Commit the pause gap and continue.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Option<&LiveRideStats> {
        if !self.stopwatch.resume(now) {
            return None;
        }
        self.stats.is_paused = false;
        self.stats.paused_duration_ms = self.stopwatch.paused_ms();
        Some(&self.stats)
    }

    /// Final figures as of `now`, with an open pause folded into the
    /// paused total. Does not modify the aggregator.
    pub fn final_snapshot(&self, now: DateTime<Utc>) -> LiveRideStats {
        let mut stats = self.stats.clone();
        if self.stopwatch.started_at().is_some() {
            stats.duration_ms = self.stopwatch.elapsed_ms(now);
            stats.paused_duration_ms = self.stopwatch.paused_ms_at(now);
            stats.calories =
                estimate_calories(self.stopwatch.active_ms(now), stats.average_heart_rate);
        }
        stats.is_recording = false;
        stats.is_paused = false;
        stats
    }

    /// Drop the session and return to idle.
    pub fn reset(&mut self) {
        self.stats = LiveRideStats::default();
        self.stopwatch = Stopwatch::Stopped;
        self.last_fix = None;
        self.crash.reset();
    }

    /// Fold a position fix. Running only.
    pub fn on_position_sample(&mut self, sample: &PositionSample) -> Option<&LiveRideStats> {
        if !self.stopwatch.is_running() {
            return None;
        }
        if !is_valid_coordinate(sample.latitude, sample.longitude) {
            tracing::warn!(
                "Dropping fix with invalid position ({}, {})",
                sample.latitude,
                sample.longitude
            );
            return None;
        }

        let (distance_km, elapsed_ms) = match self.last_fix {
            Some(last) => (
                haversine_km(
                    last.latitude,
                    last.longitude,
                    sample.latitude,
                    sample.longitude,
                ),
                (sample.timestamp - last.timestamp).num_milliseconds(),
            ),
            None => (0.0, 0),
        };

        let speed = match sample.speed_kmh {
            Some(reported) if reported.is_finite() && reported >= 0.0 => reported,
            _ => speed_kmh(distance_km, elapsed_ms),
        };

        self.stats.distance_km += distance_km;
        self.stats.current_speed_kmh = speed;
        self.stats.max_speed_kmh = self.stats.max_speed_kmh.max(speed);
        self.stats.route_points.push(RoutePoint {
            latitude: sample.latitude,
            longitude: sample.longitude,
            timestamp: sample.timestamp,
            speed_kmh: Some(speed),
            altitude_m: sample.altitude_m,
        });
        self.last_fix = Some(LastFix {
            latitude: sample.latitude,
            longitude: sample.longitude,
            timestamp: sample.timestamp,
        });

        tracing::debug!(
            "Position folded: +{:.4} km, {:.1} km/h",
            distance_km,
            speed
        );
        Some(&self.stats)
    }

    /// Fold a heart-rate sample. Running or paused.
    pub fn on_heart_rate_sample(&mut self, bpm: u16) -> Option<&LiveRideStats> {
        if self.stopwatch.started_at().is_none() {
            return None;
        }
        self.stats.current_heart_rate = bpm;
        self.stats.average_heart_rate = blend_heart_rate(self.stats.average_heart_rate, bpm);
        self.stats.max_heart_rate = self.stats.max_heart_rate.max(bpm);
        Some(&self.stats)
    }

    /// Record a power sample. Running or paused; feeds no derived figure.
    pub fn on_power_sample(&mut self, watts: u16) -> Option<&LiveRideStats> {
        if self.stopwatch.started_at().is_none() {
            return None;
        }
        self.stats.current_power = watts;
        Some(&self.stats)
    }

    /// Classify an impact. Runs in any phase.
    pub fn on_impact_sample(&mut self, net_force: f64, at: DateTime<Utc>) -> Option<ImpactEvent> {
        self.crash.classify(net_force, at)
    }

    /// Whether a crash was detected within the debounce window.
    pub fn is_crash_active(&self, now: DateTime<Utc>) -> bool {
        self.crash.is_crash_active(now)
    }

    /// Advance duration and calories to `now`. Running only.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<&LiveRideStats> {
        if !self.stopwatch.is_running() {
            return None;
        }
        self.stats.duration_ms = self.stopwatch.elapsed_ms(now);
        self.stats.paused_duration_ms = self.stopwatch.paused_ms();
        self.stats.calories = estimate_calories(
            self.stopwatch.active_ms(now),
            self.stats.average_heart_rate,
        );
        Some(&self.stats)
    }
}
