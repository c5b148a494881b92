//! RideTrack - outdoor ride recording engine
//!
//! Records a bicycle ride from phone location, an accelerometer and BLE
//! heart rate and power sensors. Samples are folded into live statistics
//! on a single session thread and persisted to SQLite when the ride ends.

pub mod metrics;
pub mod recording;
pub mod sensors;
pub mod storage;

// Re-export commonly used types
pub use recording::runtime::SessionHandle;
pub use recording::session::RideSession;
pub use sensors::bio::BioStream;
pub use storage::config::AppConfig;
pub use storage::database::Database;
