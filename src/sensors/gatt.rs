//! GATT service identifiers and measurement payload parsers.
//!
//! Only the Heart Rate Measurement and Cycling Power Measurement
//! characteristics are read. The `*_or_zero` helpers are total: a malformed
//! payload reads as a zero-value sample.

use crate::sensors::types::DeviceType;
use uuid::Uuid;

/// Heart Rate Service UUID (0x180D)
pub const HEART_RATE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_180d_0000_1000_8000_0080_5f9b_34fb);

/// Heart Rate Measurement UUID (0x2A37)
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Service UUID (0x1818)
pub const CYCLING_POWER_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_1818_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Power Measurement UUID (0x2A63)
pub const CYCLING_POWER_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a63_0000_1000_8000_0080_5f9b_34fb);

/// Cycling Speed and Cadence Service UUID (0x1816)
pub const CSC_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1816_0000_1000_8000_0080_5f9b_34fb);

/// Services worth scanning for.
pub const SCAN_SERVICES: [Uuid; 3] = [
    HEART_RATE_SERVICE_UUID,
    CYCLING_POWER_SERVICE_UUID,
    CSC_SERVICE_UUID,
];

/// Classify a peripheral from its advertised services.
///
/// Heart rate wins over power when a device advertises both.
pub fn classify_services(services: &[Uuid]) -> DeviceType {
    if services.contains(&HEART_RATE_SERVICE_UUID) {
        DeviceType::HeartRateMonitor
    } else if services.contains(&CYCLING_POWER_SERVICE_UUID) {
        DeviceType::CyclingPowerSensor
    } else if services.contains(&CSC_SERVICE_UUID) {
        DeviceType::CyclingSpeedCadenceSensor
    } else {
        DeviceType::Unknown
    }
}

/// Heart rate in bpm from a Heart Rate Measurement notification.
///
/// Bit 0 of the flags byte selects a u8 or little-endian u16 value right
/// after the flags. Trailing fields (energy, RR intervals) are not read.
pub fn parse_heart_rate_measurement(data: &[u8]) -> Option<u16> {
    let (&flags, rest) = data.split_first()?;
    if flags & 0x01 != 0 {
        match rest {
            [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
            _ => None,
        }
    } else {
        rest.first().map(|&bpm| u16::from(bpm))
    }
}

/// Heart rate from a measurement payload, 0 when the payload is malformed.
pub fn heart_rate_or_zero(data: &[u8]) -> u16 {
    parse_heart_rate_measurement(data).unwrap_or(0)
}

/// Instantaneous power in watts from a Cycling Power Measurement
/// notification: the u16 little-endian value at bytes 2-3.
pub fn parse_cycling_power_measurement(data: &[u8]) -> Option<u16> {
    match data {
        [_, _, p0, p1, ..] => Some(u16::from_le_bytes([*p0, *p1])),
        _ => None,
    }
}

/// Power from a measurement payload, 0 when shorter than four bytes.
pub fn power_or_zero(data: &[u8]) -> u16 {
    parse_cycling_power_measurement(data).unwrap_or(0)
}
