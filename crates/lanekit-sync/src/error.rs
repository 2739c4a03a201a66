//! Error types for lane synchronization.

use lanekit_core::HardwareError;
use lanekit_lanedb::RegistryError;
use thiserror::Error;

/// Errors returned by the sync engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// More than one lane reports filament in the same toolhead.
    #[error("Extruder {extruder} is claimed by several lanes: {}", .lanes.join(", "))]
    Conflict { extruder: String, lanes: Vec<String> },

    /// The printer host rejected a cross-extruder handoff.
    #[error("Runout handoff from {origin} to {target} failed: {reason}")]
    Handoff {
        origin: String,
        target: String,
        reason: String,
    },

    /// The lane is not owned by this unit.
    #[error("Unknown lane: {0}")]
    UnknownLane(String),

    #[error("Lane registration failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),
}

pub type SyncResult<T> = Result<T, SyncError>;
