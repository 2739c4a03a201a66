//! # LaneKit Core
//!
//! Core types shared by every LaneKit crate: the synchronous event bus
//! that carries lane sensor edges between components, the monotonic clock
//! abstraction, error types for feeder controllers, and the name
//! normalization helpers used to match lanes, groups and extruders.

pub mod clock;
pub mod error;
pub mod event_bus;
pub mod names;

pub use clock::{Clock, ManualClock, MonotonicClock};

pub use error::HardwareError;

// Re-export event bus for convenience
pub use event_bus::{
    Event, EventBus, EventBusConfig, EventHandler, EventPayload, EventRecord, EventType,
    SubscriptionId,
};

pub use names::{
    normalize_extruder_name, normalize_group_name, normalize_unit_name, same_extruder,
};
