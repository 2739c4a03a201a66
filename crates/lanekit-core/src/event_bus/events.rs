//! Event type definitions for the event bus.
//!
//! Lane events are identified by a string-like [`EventType`] and carry a
//! loosely typed JSON object payload. Known event names get their own
//! variant; anything else travels as [`EventType::Custom`]. Events are
//! cloneable and serializable so history can be dumped for replay.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Payload key carrying the event time in monotonic seconds
pub const EVENTTIME_KEY: &str = "eventtime";

/// Name of a published event
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// Filament appeared at a lane's feed sensor, or a load was commanded.
    SpoolLoaded,
    /// Filament left a lane's feed sensor, or an unload was commanded.
    SpoolUnloaded,
    /// Filament reached the hub.
    LaneHubLoaded,
    /// Filament left the hub.
    LaneHubUnloaded,
    /// Filament reached the toolhead sensor.
    LaneToolLoaded,
    /// Filament left the toolhead sensor.
    LaneToolUnloaded,
    /// Follower motor was enabled or disabled.
    FollowerChanged,
    /// A feed runout was classified by a sync engine.
    RunoutClassified,
    /// Any other event name.
    Custom(String),
}

impl EventType {
    /// Wire name of the event
    pub fn as_str(&self) -> &str {
        match self {
            EventType::SpoolLoaded => "spool_loaded",
            EventType::SpoolUnloaded => "spool_unloaded",
            EventType::LaneHubLoaded => "lane_hub_loaded",
            EventType::LaneHubUnloaded => "lane_hub_unloaded",
            EventType::LaneToolLoaded => "lane_tool_loaded",
            EventType::LaneToolUnloaded => "lane_tool_unloaded",
            EventType::FollowerChanged => "follower_changed",
            EventType::RunoutClassified => "runout_classified",
            EventType::Custom(name) => name,
        }
    }

    /// Edge event for a lane feed sensor transition
    pub fn spool(present: bool) -> Self {
        if present {
            EventType::SpoolLoaded
        } else {
            EventType::SpoolUnloaded
        }
    }

    /// Edge event for a hub sensor transition
    pub fn hub(present: bool) -> Self {
        if present {
            EventType::LaneHubLoaded
        } else {
            EventType::LaneHubUnloaded
        }
    }

    /// Edge event for a toolhead sensor transition
    pub fn tool(present: bool) -> Self {
        if present {
            EventType::LaneToolLoaded
        } else {
            EventType::LaneToolUnloaded
        }
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        match name {
            "spool_loaded" => EventType::SpoolLoaded,
            "spool_unloaded" => EventType::SpoolUnloaded,
            "lane_hub_loaded" => EventType::LaneHubLoaded,
            "lane_hub_unloaded" => EventType::LaneHubUnloaded,
            "lane_tool_loaded" => EventType::LaneToolLoaded,
            "lane_tool_unloaded" => EventType::LaneToolUnloaded,
            "follower_changed" => EventType::FollowerChanged,
            "runout_classified" => EventType::RunoutClassified,
            other => EventType::Custom(other.to_string()),
        }
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        EventType::from(name.as_str())
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        event_type.as_str().to_string()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keyword payload attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventPayload(Map<String, Value>);

impl EventPayload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builder-style insert
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.0
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
    }

    /// Event time carried by the publisher, if any
    pub fn eventtime(&self) -> Option<f64> {
        self.get_f64(EVENTTIME_KEY)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for EventPayload {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Build an [`EventPayload`] from `key => value` pairs
///
/// ```rust
/// use lanekit_core::payload;
///
/// let payload = payload! { "unit_name" => "AMS_1", "spool_index" => 2 };
/// assert_eq!(payload.get_usize("spool_index"), Some(2));
/// ```
#[macro_export]
macro_rules! payload {
    () => {
        $crate::event_bus::EventPayload::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        $crate::event_bus::EventPayload::new()$(.with($key, $value))+
    };
}

/// An event as delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub event_type: EventType,
    pub payload: EventPayload,
}

/// An entry in the bus history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: EventType,
    /// Payload `eventtime` when supplied, otherwise the bus clock at publish
    pub timestamp: f64,
    pub payload: EventPayload,
}
