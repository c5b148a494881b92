//! Ride recording: the session state machine and its live statistics.

pub mod aggregator;
pub mod clock;
pub mod runtime;
pub mod session;
pub mod stopwatch;
pub mod types;

pub use aggregator::TelemetryAggregator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use runtime::SessionHandle;
pub use session::{recover_orphans, RideSession};
pub use stopwatch::Stopwatch;
pub use types::{
    LiveRideStats, RideId, RideRecord, RideStatus, RoutePoint, SessionError, SessionEvent,
    SessionState,
};
