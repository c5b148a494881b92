//! Storage module for ride persistence and configuration.

pub mod config;
pub mod database;
pub mod schema;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use database::{Database, DatabaseError};
pub use store::{RideStatistics, SessionStore, StartTimeOrder};
