//! # LaneKit Settings
//!
//! Configuration file handling for LaneKit units and lanes, and the
//! read-only loader for the persisted unit state file written by the
//! printer host.

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{BusSettings, Config, LaneSettings, PersistenceSettings, UnitSettings};
pub use error::{ConfigError, SettingsError, SettingsResult};
pub use persistence::{PersistedStateCache, PersistedUnitState};
