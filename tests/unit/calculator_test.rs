//! Unit tests for ride metric formulas.

use ridetrack::metrics::calculator::{
    blend_heart_rate, calories_per_minute, estimate_calories, haversine_km, speed_kmh,
};

#[test]
fn test_haversine_one_degree_of_latitude() {
    let d = haversine_km(0.0, 0.0, 1.0, 0.0);
    assert!((d - 111.195).abs() < 0.01, "got {}", d);
}

#[test]
fn test_haversine_same_point_is_zero() {
    assert_eq!(haversine_km(51.5, -0.12, 51.5, -0.12), 0.0);
}

#[test]
fn test_haversine_is_symmetric() {
    let a = haversine_km(48.8566, 2.3522, 52.52, 13.405);
    let b = haversine_km(52.52, 13.405, 48.8566, 2.3522);
    assert!((a - b).abs() < 1e-9);
    // Paris to Berlin, roughly 878 km
    assert!((a - 878.0).abs() < 5.0, "got {}", a);
}

#[test]
fn test_speed_from_distance() {
    // 1 km in 2 minutes = 30 km/h
    assert!((speed_kmh(1.0, 120_000) - 30.0).abs() < 1e-9);
    assert_eq!(speed_kmh(1.0, 0), 0.0);
    assert_eq!(speed_kmh(1.0, -5), 0.0);
}

#[test]
fn test_heart_rate_blend_is_recency_weighted() {
    let mut average = 0;
    for sample in [100, 120, 140] {
        average = blend_heart_rate(average, sample);
    }
    // 100 -> 110 -> 125, not the arithmetic mean of 120
    assert_eq!(average, 125);
}

#[test]
fn test_heart_rate_blend_rounds_half_up() {
    assert_eq!(blend_heart_rate(100, 101), 101);
    assert_eq!(blend_heart_rate(100, 100), 100);
}

#[test]
fn test_calorie_rate_brackets() {
    assert_eq!(calories_per_minute(119), 8.0);
    assert_eq!(calories_per_minute(120), 12.0);
    assert_eq!(calories_per_minute(149), 12.0);
    assert_eq!(calories_per_minute(150), 16.0);
}

#[test]
fn test_calories_default_to_120_bpm() {
    // 10 minutes with no heart-rate data uses the 12 cal/min bracket
    assert_eq!(estimate_calories(600_000, 0), 120);
    assert_eq!(estimate_calories(600_000, 100), 80);
    assert_eq!(estimate_calories(600_000, 160), 160);
}

#[test]
fn test_calories_truncate() {
    // 95 seconds at 8 cal/min is 12.66
    assert_eq!(estimate_calories(95_000, 100), 12);
    assert_eq!(estimate_calories(0, 160), 0);
    assert_eq!(estimate_calories(-1_000, 160), 0);
}

#[test]
fn test_heart_rate_blend_documented_sequence() {
    let average = blend_heart_rate(blend_heart_rate(0, 100), 140);
    assert_eq!(average, 120);
    // Not the arithmetic mean of 133
    assert_eq!(blend_heart_rate(average, 160), 140);
}

#[test]
fn test_calories_over_ten_minutes() {
    assert_eq!(estimate_calories(600_000, 110), 80);
    assert_eq!(estimate_calories(600_000, 135), 120);
    assert_eq!(estimate_calories(600_000, 160), 160);
}

#[test]
fn test_coordinate_validation() {
    use ridetrack::metrics::calculator::is_valid_coordinate;

    assert!(is_valid_coordinate(52.0, 4.0));
    assert!(is_valid_coordinate(-90.0, 180.0));
    assert!(!is_valid_coordinate(f64::NAN, 4.0));
    assert!(!is_valid_coordinate(52.0, f64::NEG_INFINITY));
    assert!(!is_valid_coordinate(90.5, 0.0));
    assert!(!is_valid_coordinate(0.0, -180.5));
}
