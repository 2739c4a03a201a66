//! Per-lane sensor snapshots.

use serde::{Deserialize, Serialize};

/// Payload `source` for events derived from a sensor edge
pub const SOURCE_SENSOR: &str = "sensor";
/// Payload `source` for optimistic events published when a command is sent
pub const SOURCE_COMMAND: &str = "command";

/// Last observed sensor state of one lane
///
/// Each sensor is `None` until its first observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSnapshot {
    pub unit: String,
    pub lane: String,
    pub lane_state: Option<bool>,
    pub hub_state: Option<bool>,
    pub tool_state: Option<bool>,
    pub timestamp: f64,
    pub spool_index: Option<usize>,
}

impl LaneSnapshot {
    pub(crate) fn new(unit: &str, lane: &str) -> Self {
        Self {
            unit: unit.to_string(),
            lane: lane.to_string(),
            lane_state: None,
            hub_state: None,
            tool_state: None,
            timestamp: 0.0,
            spool_index: None,
        }
    }
}

/// One sensor reading for a lane, fed to `HardwareService::update_lane_snapshot`
#[derive(Debug, Clone, PartialEq)]
pub struct LaneObservation {
    pub unit: String,
    pub lane: String,
    /// Feed sensor
    pub lane_state: bool,
    /// `None` when the hub was not observed
    pub hub_state: Option<bool>,
    /// `None` when the toolhead was not observed
    pub tool_state: Option<bool>,
    pub eventtime: f64,
    pub spool_index: Option<usize>,
    /// Publish `spool_loaded`/`spool_unloaded` on a feed edge
    pub emit_spool_event: bool,
}

impl LaneObservation {
    pub fn new(
        unit: impl Into<String>,
        lane: impl Into<String>,
        lane_state: bool,
        eventtime: f64,
    ) -> Self {
        Self {
            unit: unit.into(),
            lane: lane.into(),
            lane_state,
            hub_state: None,
            tool_state: None,
            eventtime,
            spool_index: None,
            emit_spool_event: true,
        }
    }

    pub fn with_hub(mut self, hub_state: Option<bool>) -> Self {
        self.hub_state = hub_state;
        self
    }

    pub fn with_tool(mut self, tool_state: Option<bool>) -> Self {
        self.tool_state = tool_state;
        self
    }

    pub fn with_spool_index(mut self, spool_index: usize) -> Self {
        self.spool_index = Some(spool_index);
        self
    }

    pub fn without_spool_event(mut self) -> Self {
        self.emit_spool_event = false;
        self
    }
}
