//! # Event Bus Module
//!
//! Priority-ordered publish/subscribe channel connecting the hardware
//! service, sync engines and any status consumers of one controller
//! context.
//!
//! ## Overview
//!
//! - Publishers emit named events with a JSON object payload
//! - Subscribers register per event name with an integer priority
//! - Every publish is kept in a bounded history, even with no subscribers
//!
//! ## Usage
//!
//! ```rust
//! use lanekit_core::{payload, EventBus, EventType};
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(EventType::SpoolLoaded, 0, |event| {
//!     println!("spool loaded: {:?}", event.payload.get_str("lane_name"));
//!     Ok(())
//! });
//!
//! let handled = bus.publish(
//!     EventType::SpoolLoaded,
//!     payload! { "unit_name" => "AMS_1", "lane_name" => "lane1" },
//! );
//! assert_eq!(handled, 1);
//!
//! bus.unsubscribe(EventType::SpoolLoaded, subscription);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
