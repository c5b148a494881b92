//! Persistence contract used by the ride session.

use crate::recording::types::{RideId, RideRecord, RideStatus};
use crate::storage::database::DatabaseError;
use serde::{Deserialize, Serialize};

/// Sort order by ride start time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartTimeOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Lifetime totals over completed rides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RideStatistics {
    /// Sum of distances in kilometers
    pub total_distance_km: f64,
    /// Sum of active durations in milliseconds
    pub total_active_time_ms: i64,
    /// Mean of per-ride average speeds, over rides that moved
    pub average_speed_kmh: f64,
    /// Sum of calories
    pub total_calories: u64,
    /// Number of completed rides
    pub completed_rides: u32,
}

impl RideStatistics {
    /// Total distance, e.g. `"12.3 km"`.
    pub fn formatted_distance(&self) -> String {
        format!("{:.1} km", self.total_distance_km)
    }

    /// Total active time, e.g. `"1h 5m"` or `"42m"`.
    pub fn formatted_active_time(&self) -> String {
        let total_minutes = self.total_active_time_ms.max(0) / 60_000;
        let hours = total_minutes / 60;
        let minutes = total_minutes % 60;
        if hours > 0 {
            format!("{}h {}m", hours, minutes)
        } else {
            format!("{}m", minutes)
        }
    }

    /// Average speed, e.g. `"21.4 km/h"`.
    pub fn formatted_average_speed(&self) -> String {
        format!("{:.1} km/h", self.average_speed_kmh)
    }
}

/// Ride persistence.
///
/// At most one record may be `Active` or `Paused` at a time; the session
/// enforces this, the store only reports it.
pub trait SessionStore: Send + Sync {
    /// Insert a record and return its id.
    fn create(&self, record: &RideRecord) -> Result<RideId, DatabaseError>;

    fn read(&self, id: RideId) -> Result<Option<RideRecord>, DatabaseError>;

    /// The Active or Paused record, if any.
    fn read_active(&self) -> Result<Option<RideRecord>, DatabaseError>;

    /// Overwrite the record with `record.id`.
    fn update(&self, record: &RideRecord) -> Result<(), DatabaseError>;

    fn delete(&self, id: RideId) -> Result<(), DatabaseError>;

    /// Delete every record with `status`, returning how many went.
    fn delete_where(&self, status: RideStatus) -> Result<usize, DatabaseError>;

    /// Mark every Active or Paused record `Cancelled`.
    fn cancel_unfinished(&self) -> Result<usize, DatabaseError>;

    /// Records with `status`, ordered by start time.
    fn list(
        &self,
        status: RideStatus,
        limit: Option<usize>,
        order: StartTimeOrder,
    ) -> Result<Vec<RideRecord>, DatabaseError>;

    /// Totals over `Completed` records.
    fn statistics(&self) -> Result<RideStatistics, DatabaseError>;
}
