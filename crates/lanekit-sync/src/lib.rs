//! # LaneKit Sync
//!
//! Lane state reconciliation and runout handling for lane-owning units.
//!
//! A [`ControllerContext`] bundles the event bus, lane registry, hardware
//! services and runout coordinator for one printer controller. Each unit
//! gets a [`SyncEngine`] that consumes sensor edges from the bus, keeps
//! the loaded-lane record in line with the toolhead and hub sensors, and
//! decides what a runout means for the print.

pub mod context;
pub mod engine;
pub mod error;
pub mod lane;
pub mod reconcile;
pub mod runout;

pub use context::{ContextId, ControllerContext, ControllerContextBuilder};
pub use engine::{SyncEngine, SyncEngineConfig};
pub use error::{SyncError, SyncResult};
pub use lane::{
    HubHandle, LaneBinding, LaneConfig, LaneHandle, LaneState, LaneStatus, PrinterHost,
};
pub use reconcile::{reconcile, Conflict, LaneReading, Reconciliation};
pub use runout::RunoutOutcome;
