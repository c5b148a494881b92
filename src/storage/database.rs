//! Database operations using rusqlite.
//!
//! [`Database`] is the SQLite implementation of [`SessionStore`]. Routes are
//! stored as JSON; timestamps as fixed-width RFC 3339 UTC text so that
//! ordering by the column orders by time.

use crate::recording::types::{RideId, RideRecord, RideStatus, RoutePoint};
use crate::storage::schema::{CURRENT_VERSION, SCHEMA, SCHEMA_VERSION_TABLE};
use crate::storage::store::{RideStatistics, SessionStore, StartTimeOrder};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

const RIDE_COLUMNS: &str = "id, started_at, ended_at, duration_ms, paused_duration_ms, \
     distance_km, average_speed_kmh, max_speed_kmh, calories, average_heart_rate, \
     max_heart_rate, route_json, status";

/// Database wrapper for SQLite operations.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::IoError(e.to_string()))?;
        }

        let conn =
            Connection::open(path).map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.initialize()?;

        Ok(db)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Initialize the database schema.
    fn initialize(&self) -> Result<(), DatabaseError> {
        self.conn()
            .execute_batch(SCHEMA_VERSION_TABLE)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        let current_version = self.schema_version()?;

        if current_version < CURRENT_VERSION {
            self.migrate(current_version)?;
        }

        Ok(())
    }

    /// Get the current schema version.
    pub fn schema_version(&self) -> Result<i32, DatabaseError> {
        let result: SqliteResult<i32> = self.conn().query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(version) => Ok(version),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(DatabaseError::QueryFailed(e.to_string())),
        }
    }

    /// Run database migrations.
    fn migrate(&self, from_version: i32) -> Result<(), DatabaseError> {
        if from_version < 1 {
            let conn = self.conn();
            conn.execute_batch(SCHEMA)
                .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            conn.execute(
                "INSERT INTO schema_version (version, applied_at) VALUES (?, datetime('now'))",
                [CURRENT_VERSION],
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

            tracing::info!("Database migrated to version {}", CURRENT_VERSION);
        }

        Ok(())
    }

    /// Completed rides, newest first.
    pub fn recent_rides(&self, limit: usize) -> Result<Vec<RideRecord>, DatabaseError> {
        self.list(
            RideStatus::Completed,
            Some(limit),
            StartTimeOrder::NewestFirst,
        )
    }
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str, field: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::DeserializationError(format!("Invalid {}: {}", field, e)))
}

/// Raw row before conversion.
struct RideRow {
    id: i64,
    started_at: String,
    ended_at: Option<String>,
    duration_ms: i64,
    paused_duration_ms: i64,
    distance_km: f64,
    average_speed_kmh: f64,
    max_speed_kmh: f64,
    calories: u32,
    average_heart_rate: u16,
    max_heart_rate: u16,
    route_json: String,
    status: String,
}

impl RideRow {
    fn from_row(row: &Row<'_>) -> SqliteResult<Self> {
        Ok(Self {
            id: row.get(0)?,
            started_at: row.get(1)?,
            ended_at: row.get(2)?,
            duration_ms: row.get(3)?,
            paused_duration_ms: row.get(4)?,
            distance_km: row.get(5)?,
            average_speed_kmh: row.get(6)?,
            max_speed_kmh: row.get(7)?,
            calories: row.get(8)?,
            average_heart_rate: row.get(9)?,
            max_heart_rate: row.get(10)?,
            route_json: row.get(11)?,
            status: row.get(12)?,
        })
    }

    fn into_record(self) -> Result<RideRecord, DatabaseError> {
        let started_at = parse_timestamp(&self.started_at, "start time")?;
        let ended_at = self
            .ended_at
            .map(|s| parse_timestamp(&s, "end time"))
            .transpose()?;
        let route_points: Vec<RoutePoint> = serde_json::from_str(&self.route_json)
            .map_err(|e| DatabaseError::DeserializationError(format!("Invalid route: {}", e)))?;

        Ok(RideRecord {
            id: self.id,
            started_at,
            ended_at,
            duration_ms: self.duration_ms,
            paused_duration_ms: self.paused_duration_ms,
            distance_km: self.distance_km,
            average_speed_kmh: self.average_speed_kmh,
            max_speed_kmh: self.max_speed_kmh,
            calories: self.calories,
            average_heart_rate: self.average_heart_rate,
            max_heart_rate: self.max_heart_rate,
            route_points,
            status: RideStatus::from_str_lossy(&self.status),
        })
    }
}

fn route_json(record: &RideRecord) -> Result<String, DatabaseError> {
    serde_json::to_string(&record.route_points)
        .map_err(|e| DatabaseError::SerializationError(e.to_string()))
}

impl SessionStore for Database {
    fn create(&self, record: &RideRecord) -> Result<RideId, DatabaseError> {
        let route = route_json(record)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO rides (started_at, ended_at, duration_ms, paused_duration_ms,
             distance_km, average_speed_kmh, max_speed_kmh, calories, average_heart_rate,
             max_heart_rate, route_json, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                format_timestamp(&record.started_at),
                record.ended_at.as_ref().map(format_timestamp),
                record.duration_ms,
                record.paused_duration_ms,
                record.distance_km,
                record.average_speed_kmh,
                record.max_speed_kmh,
                record.calories,
                record.average_heart_rate,
                record.max_heart_rate,
                route,
                record.status.as_str(),
            ],
        )
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let id = conn.last_insert_rowid();
        tracing::debug!("Created ride {} ({})", id, record.status);
        Ok(id)
    }

    fn read(&self, id: RideId) -> Result<Option<RideRecord>, DatabaseError> {
        let row = self
            .conn()
            .query_row(
                &format!("SELECT {} FROM rides WHERE id = ?1", RIDE_COLUMNS),
                params![id],
                RideRow::from_row,
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        row.map(RideRow::into_record).transpose()
    }

    fn read_active(&self) -> Result<Option<RideRecord>, DatabaseError> {
        let row = self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM rides WHERE status IN ('ACTIVE', 'PAUSED')
                     ORDER BY started_at DESC LIMIT 1",
                    RIDE_COLUMNS
                ),
                [],
                RideRow::from_row,
            )
            .optional()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        row.map(RideRow::into_record).transpose()
    }

    fn update(&self, record: &RideRecord) -> Result<(), DatabaseError> {
        let route = route_json(record)?;
        let rows = self
            .conn()
            .execute(
                "UPDATE rides SET started_at = ?1, ended_at = ?2, duration_ms = ?3,
                 paused_duration_ms = ?4, distance_km = ?5, average_speed_kmh = ?6,
                 max_speed_kmh = ?7, calories = ?8, average_heart_rate = ?9,
                 max_heart_rate = ?10, route_json = ?11, status = ?12
                 WHERE id = ?13",
                params![
                    format_timestamp(&record.started_at),
                    record.ended_at.as_ref().map(format_timestamp),
                    record.duration_ms,
                    record.paused_duration_ms,
                    record.distance_km,
                    record.average_speed_kmh,
                    record.max_speed_kmh,
                    record.calories,
                    record.average_heart_rate,
                    record.max_heart_rate,
                    route,
                    record.status.as_str(),
                    record.id,
                ],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if rows == 0 {
            return Err(DatabaseError::NotFound(format!("ride {}", record.id)));
        }
        Ok(())
    }

    fn delete(&self, id: RideId) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM rides WHERE id = ?1", params![id])
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    fn delete_where(&self, status: RideStatus) -> Result<usize, DatabaseError> {
        let rows = match status {
            // Unrecognized status text reads as cancelled, so it is purged too
            RideStatus::Cancelled => self.conn().execute(
                "DELETE FROM rides WHERE status NOT IN ('ACTIVE', 'PAUSED', 'COMPLETED')",
                [],
            ),
            other => self
                .conn()
                .execute("DELETE FROM rides WHERE status = ?1", params![other.as_str()]),
        }
        .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        if rows > 0 {
            tracing::info!("Deleted {} {} ride(s)", rows, status);
        }
        Ok(rows)
    }

    fn cancel_unfinished(&self) -> Result<usize, DatabaseError> {
        self.conn()
            .execute(
                "UPDATE rides SET status = 'CANCELLED' WHERE status IN ('ACTIVE', 'PAUSED')",
                [],
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }

    fn list(
        &self,
        status: RideStatus,
        limit: Option<usize>,
        order: StartTimeOrder,
    ) -> Result<Vec<RideRecord>, DatabaseError> {
        let direction = match order {
            StartTimeOrder::NewestFirst => "DESC",
            StartTimeOrder::OldestFirst => "ASC",
        };
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        let conn = self.conn();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM rides WHERE status = ?1
                 ORDER BY started_at {dir}, id {dir} LIMIT ?2",
                RIDE_COLUMNS,
                dir = direction
            ))
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        let rows = stmt
            .query_map(params![status.as_str(), limit], RideRow::from_row)
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?
            .collect::<SqliteResult<Vec<_>>>()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;

        rows.into_iter().map(RideRow::into_record).collect()
    }

    fn statistics(&self) -> Result<RideStatistics, DatabaseError> {
        let completed = RideStatus::Completed.as_str();
        self.conn()
            .query_row(
                "SELECT COALESCE(SUM(distance_km), 0.0),
                        COALESCE(SUM(duration_ms - paused_duration_ms), 0),
                        (SELECT COALESCE(AVG(average_speed_kmh), 0.0) FROM rides
                          WHERE status = ?1 AND average_speed_kmh > 0),
                        COALESCE(SUM(calories), 0),
                        COUNT(*)
                 FROM rides WHERE status = ?1",
                params![completed],
                |row| {
                    let total_calories: i64 = row.get(3)?;
                    let completed_rides: i64 = row.get(4)?;
                    Ok(RideStatistics {
                        total_distance_km: row.get(0)?,
                        total_active_time_ms: row.get(1)?,
                        average_speed_kmh: row.get(2)?,
                        total_calories: total_calories.max(0) as u64,
                        completed_rides: completed_rides.max(0) as u32,
                    })
                },
            )
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
