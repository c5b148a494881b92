//! Sensor streams feeding the ride session.
//!
//! Location and accelerometer sources sit behind small provider traits;
//! BLE heart rate and power monitors are reached through [`ble::BleCentral`].

pub mod bio;
pub mod ble;
pub mod gatt;
pub mod geo;
pub mod impact;
pub mod types;

pub use bio::{BioEvent, BioStream};
pub use ble::{BleCentral, BtleplugCentral, RadioEvent};
pub use geo::{GeoStream, LocationProvider, ManualLocationProvider, RawLocation};
pub use impact::{
    AccelReading, Accelerometer, CrashDetector, ImpactEvent, ImpactMonitor, ManualAccelerometer,
    Vector3,
};
pub use types::{
    sample_channel, BleDevice, DeviceType, ImpactSample, LocationRequest, PositionSample,
    SampleEvent, SampleSink, SensorConfig, SensorError,
};
