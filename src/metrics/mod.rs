//! Ride metric calculations.

pub mod calculator;

pub use calculator::{blend_heart_rate, estimate_calories, haversine_km, speed_kmh};
