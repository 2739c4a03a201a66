//! # LaneKit Hardware
//!
//! The seam between lane logic and a physical feeder controller. A
//! [`HardwareService`] wraps one controller, turns raw sensor polls into
//! edge events on the bus and forwards actuation commands. The
//! [`RunoutCoordinator`] lets lane owners and runout monitors find each
//! other by hardware unit name.

pub mod controller;
pub mod coordinator;
pub mod directory;
pub mod service;
pub mod simulated;
pub mod snapshot;

pub use controller::{ControllerLookup, ControllerStatus, FeederController, StaticControllerLookup};
pub use coordinator::{RunoutConsumer, RunoutCoordinator, RunoutMonitor};
pub use directory::HardwareDirectory;
pub use service::{HardwareService, ObserverId, StatusObserver};
pub use simulated::{SentCommand, SimulatedController};
pub use snapshot::{LaneObservation, LaneSnapshot, SOURCE_COMMAND, SOURCE_SENSOR};
