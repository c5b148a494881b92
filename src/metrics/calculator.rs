//! Ride metric formulas.
//!
//! Pure functions over plain numbers: great-circle distance, derived speed,
//! heart-rate blending and the heart-rate based calorie estimate.

/// Mean Earth radius in meters.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Milliseconds per hour.
const MS_PER_HOUR: f64 = 3_600_000.0;

/// Milliseconds per minute.
const MS_PER_MINUTE: f64 = 60_000.0;

/// Heart rate assumed when no heart-rate data exists.
pub const DEFAULT_HEART_RATE_BPM: u16 = 120;

/// Whether a latitude/longitude pair is a usable position.
pub fn is_valid_coordinate(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && (-90.0..=90.0).contains(&latitude)
        && (-180.0..=180.0).contains(&longitude)
}

/// Great-circle distance between two points in kilometers (haversine).
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    // Clamp guards asin against rounding just above 1.0 for antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_M * c / 1000.0
}

/// Speed in km/h from a distance covered over `elapsed_ms`.
///
/// Returns 0 when the elapsed time is not positive.
pub fn speed_kmh(distance_km: f64, elapsed_ms: i64) -> f64 {
    if elapsed_ms <= 0 {
        return 0.0;
    }
    distance_km / (elapsed_ms as f64 / MS_PER_HOUR)
}

/// Blend a new heart-rate sample into the running average.
///
/// This is a two-point recency-weighted blend, not an arithmetic mean:
/// `round((average + sample) / 2)`, or the sample itself when there is no
/// average yet (0).
pub fn blend_heart_rate(average: u16, sample: u16) -> u16 {
    if average == 0 {
        return sample;
    }
    ((f64::from(average) + f64::from(sample)) / 2.0).round() as u16
}

/// Calories burned per minute at the given average heart rate.
pub fn calories_per_minute(average_heart_rate: u16) -> f64 {
    match average_heart_rate {
        0..=119 => 8.0,
        120..=149 => 12.0,
        _ => 16.0,
    }
}

/// Calorie estimate for `active_ms` of riding, truncated to whole calories.
///
/// An average of 0 means no heart-rate data and falls back to
/// [`DEFAULT_HEART_RATE_BPM`].
pub fn estimate_calories(active_ms: i64, average_heart_rate: u16) -> u32 {
    if active_ms <= 0 {
        return 0;
    }
    let heart_rate = if average_heart_rate > 0 {
        average_heart_rate
    } else {
        DEFAULT_HEART_RATE_BPM
    };
    let minutes = active_ms as f64 / MS_PER_MINUTE;
    (minutes * calories_per_minute(heart_rate)) as u32
}
