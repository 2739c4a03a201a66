//! Lanes as seen by the sync engine, and the collaborators it drives.

use lanekit_lanedb::LaneRegistration;
use lanekit_settings::{LaneSettings, UnitSettings};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The lane object owned by the printer host
pub trait LaneHandle: Send + Sync {
    /// Filament is now loaded through to the toolhead
    fn set_tool_loaded(&self) -> anyhow::Result<()>;

    /// Filament left the toolhead
    fn set_unloaded(&self) -> anyhow::Result<()>;

    fn sync_to_extruder(&self) -> anyhow::Result<()>;

    fn unsync_to_extruder(&self) -> anyhow::Result<()>;

    /// Feed sensor (prep) changed
    fn prep_callback(&self, eventtime: f64, present: bool) -> anyhow::Result<()>;

    /// Load sensor changed; driven by the same feed edge
    fn load_callback(&self, eventtime: f64, present: bool) -> anyhow::Result<()>;

    /// Toolhead filament sensor, when the lane has one
    fn tool_filament(&self) -> Option<bool> {
        None
    }
}

/// A hub shared by several lanes
pub trait HubHandle: Send + Sync {
    fn name(&self) -> &str;

    fn switch_pin_callback(&self, eventtime: f64, present: bool) -> anyhow::Result<()>;
}

/// Printer-level actions the engine may request
pub trait PrinterHost: Send + Sync {
    fn is_printing(&self) -> bool;

    fn pause(&self, message: &str) -> anyhow::Result<()>;

    /// Continue the print from `target_lane` on another extruder
    fn cross_extruder_handoff(&self, origin_lane: &str, target_lane: &str) -> anyhow::Result<()>;

    /// Hand the runout to the extruder's own runout handling
    fn native_runout(&self, extruder: Option<&str>, lane: &str) -> anyhow::Result<()>;

    fn save_state(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Static configuration of one lane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneConfig {
    pub name: String,
    pub spool_index: usize,
    pub extruder: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub hub: Option<String>,
    /// Lane, alias or group token to continue from on runout
    #[serde(default)]
    pub runout_lane: Option<String>,
}

impl LaneConfig {
    pub fn new(name: impl Into<String>, spool_index: usize, extruder: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spool_index,
            extruder: extruder.into(),
            group: None,
            hub: None,
            runout_lane: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_runout_lane(mut self, target: impl Into<String>) -> Self {
        self.runout_lane = Some(target.into());
        self
    }

    pub fn from_settings(unit: &UnitSettings, lane: &LaneSettings) -> Self {
        Self {
            name: lane.name.clone(),
            spool_index: lane.spool_index,
            extruder: unit.lane_extruder(lane).to_string(),
            group: lane.group.clone(),
            hub: lane.hub.clone(),
            runout_lane: lane.runout_lane.clone(),
        }
    }

    pub(crate) fn registration(&self, unit: &str) -> LaneRegistration {
        let mut registration =
            LaneRegistration::new(self.name.clone(), unit, self.spool_index, self.extruder.clone());
        registration.group = self.group.clone();
        registration.hub_name = self.hub.clone();
        registration
    }
}

/// A configured lane with its collaborators
#[derive(Clone)]
pub struct LaneBinding {
    pub config: LaneConfig,
    pub handle: Arc<dyn LaneHandle>,
    pub hub: Option<Arc<dyn HubHandle>>,
}

impl LaneBinding {
    pub fn new(config: LaneConfig, handle: Arc<dyn LaneHandle>) -> Self {
        Self {
            config,
            handle,
            hub: None,
        }
    }

    pub fn with_hub(mut self, hub: Arc<dyn HubHandle>) -> Self {
        self.hub = Some(hub);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

impl std::fmt::Debug for LaneBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaneBinding")
            .field("config", &self.config)
            .field("hub", &self.hub.as_ref().map(|hub| hub.name().to_string()))
            .finish()
    }
}

/// Where a lane's filament is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaneState {
    /// No sensor has reported yet
    Unknown,
    Empty,
    /// Filament at the feed or hub sensor
    Primed,
    ToolLoaded,
}

impl LaneState {
    pub fn from_sensors(
        feed: Option<bool>,
        hub: Option<bool>,
        tool: Option<bool>,
        loaded_to_tool: bool,
    ) -> Self {
        if loaded_to_tool || tool == Some(true) {
            return LaneState::ToolLoaded;
        }
        if feed == Some(true) || hub == Some(true) {
            return LaneState::Primed;
        }
        if feed.is_none() && hub.is_none() && tool.is_none() {
            return LaneState::Unknown;
        }
        LaneState::Empty
    }
}

impl std::fmt::Display for LaneState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LaneState::Unknown => "unknown",
            LaneState::Empty => "empty",
            LaneState::Primed => "primed",
            LaneState::ToolLoaded => "tool_loaded",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of one lane
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LaneStatus {
    pub lane: String,
    pub extruder: String,
    pub state: LaneState,
    pub runout_in_progress: bool,
    /// Encoder moved while this lane was the loaded spool
    pub feed_activity: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lane_state_from_sensors() {
        assert_eq!(LaneState::from_sensors(None, None, None, false), LaneState::Unknown);
        assert_eq!(
            LaneState::from_sensors(Some(false), None, None, false),
            LaneState::Empty
        );
        assert_eq!(
            LaneState::from_sensors(Some(false), Some(true), None, false),
            LaneState::Primed
        );
        assert_eq!(
            LaneState::from_sensors(Some(true), Some(true), Some(true), false),
            LaneState::ToolLoaded
        );
        assert_eq!(
            LaneState::from_sensors(None, None, None, true),
            LaneState::ToolLoaded
        );
    }

    #[test]
    fn test_config_from_settings() {
        let unit = UnitSettings::default();
        let mut lane = LaneSettings::new("lane3", 2);
        lane.runout_lane = Some("T4".to_string());
        lane.extruder = Some("extruder2".to_string());

        let config = LaneConfig::from_settings(&unit, &lane);
        assert_eq!(config.extruder, "extruder2");
        assert_eq!(config.runout_lane.as_deref(), Some("T4"));

        let registration = config.registration("AMS_1");
        assert_eq!(registration.unit_name, "AMS_1");
        assert_eq!(registration.spool_index, 2);
    }

    #[test]
    fn test_lane_state_display() {
        assert_eq!(LaneState::ToolLoaded.to_string(), "tool_loaded");
    }
}
