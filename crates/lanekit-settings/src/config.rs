//! Configuration for LaneKit
//!
//! Provides configuration file handling and validation. Supports JSON and
//! TOML file formats; the default location is the platform config
//! directory (`~/.config/lanekit/lanekit.toml` on Linux).
//!
//! Configuration is organized into logical sections:
//! - Event bus sizing
//! - Persisted state location
//! - Units, each with its hardware controller and lanes

use lanekit_core::EventBusConfig;
use lanekit_lanedb::LaneRegistration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, SettingsError, SettingsResult};

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    /// Maximum number of records kept in the bus history
    pub history_capacity: usize,
    /// Capacity of the async broadcast channel
    pub channel_capacity: usize,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            history_capacity: 500,
            channel_capacity: 256,
        }
    }
}

impl BusSettings {
    pub fn to_bus_config(&self) -> EventBusConfig {
        EventBusConfig {
            channel_capacity: self.channel_capacity,
            max_history_size: self.history_capacity,
        }
    }
}

/// Location of the persisted unit state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceSettings {
    /// JSON file written by the printer host; `None` disables restore
    pub var_file: Option<PathBuf>,
}

/// One lane of a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaneSettings {
    pub name: String,
    pub spool_index: usize,
    /// Overrides the unit's extruder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extruder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<String>,
    /// Lane or group token to hand off to on runout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runout_lane: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub led_index: Option<String>,
}

impl LaneSettings {
    pub fn new(name: impl Into<String>, spool_index: usize) -> Self {
        Self {
            name: name.into(),
            spool_index,
            extruder: None,
            group: None,
            hub: None,
            fps: None,
            runout_lane: None,
            led_index: None,
        }
    }
}

/// One lane-owning unit and the feeder hardware behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitSettings {
    /// Unit name lanes are registered under, e.g. `AMS_1`
    pub name: String,
    /// Hardware controller name, e.g. `oams1`
    pub hardware: String,
    /// Default extruder for the unit's lanes
    pub extruder: String,
    /// Number of spool bays on the controller
    pub bays: usize,
    pub sync_interval_ms: u64,
    pub hub_wait_timeout_ms: u64,
    pub lanes: Vec<LaneSettings>,
}

impl Default for UnitSettings {
    fn default() -> Self {
        Self {
            name: "AMS_1".to_string(),
            hardware: "oams1".to_string(),
            extruder: "extruder".to_string(),
            bays: 4,
            sync_interval_ms: 1000,
            hub_wait_timeout_ms: 5000,
            lanes: Vec::new(),
        }
    }
}

impl UnitSettings {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn hub_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.hub_wait_timeout_ms)
    }

    /// Extruder a lane feeds, falling back to the unit default
    pub fn lane_extruder<'a>(&'a self, lane: &'a LaneSettings) -> &'a str {
        lane.extruder.as_deref().unwrap_or(&self.extruder)
    }

    /// Registry entry for one of this unit's lanes
    pub fn lane_registration(&self, lane: &LaneSettings) -> LaneRegistration {
        let mut registration = LaneRegistration::new(
            lane.name.clone(),
            self.name.clone(),
            lane.spool_index,
            self.lane_extruder(lane),
        );
        registration.group = lane.group.clone();
        registration.hub_name = lane.hub.clone();
        registration.fps_name = lane.fps.clone();
        registration.led_index = lane.led_index.clone();
        registration
    }
}

/// Complete LaneKit configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusSettings,
    pub persistence: PersistenceSettings,
    pub units: Vec<UnitSettings>,
}

enum Format {
    Json,
    Toml,
}

fn format_for(path: &Path) -> Result<Format, ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
    }
}

impl Config {
    /// Default configuration file location
    pub fn default_path() -> SettingsResult<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            SettingsError::ConfigDirectory("no platform config directory".to_string())
        })?;
        Ok(dir.join("lanekit").join("lanekit.toml"))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_for(path)?;
        let content = std::fs::read_to_string(path)?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::info!(path = %path.display(), units = config.units.len(), "Loaded configuration");
        Ok(config)
    }

    /// Load `path`, or the default location when it exists, or defaults
    pub fn load_or_default(path: Option<&Path>) -> SettingsResult<Self> {
        if let Some(path) = path {
            return Self::load_from_file(path);
        }
        match Self::default_path() {
            Ok(default) if default.exists() => Self::load_from_file(&default),
            _ => {
                tracing::debug!("No configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_for(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.history_capacity == 0 {
            return Err(out_of_range("bus.history_capacity", 0));
        }
        if self.bus.channel_capacity == 0 {
            return Err(out_of_range("bus.channel_capacity", 0));
        }

        let mut unit_names = HashSet::new();
        let mut lane_names = HashSet::new();
        for (i, unit) in self.units.iter().enumerate() {
            if unit.name.trim().is_empty() {
                return Err(ConfigError::MissingKey(format!("units[{}].name", i)));
            }
            if unit.hardware.trim().is_empty() {
                return Err(ConfigError::MissingKey(format!("units[{}].hardware", i)));
            }
            if !unit_names.insert(unit.name.as_str()) {
                return Err(duplicate("unit", &unit.name));
            }
            if unit.bays == 0 {
                return Err(out_of_range(&format!("units[{}].bays", i), 0));
            }
            if unit.sync_interval_ms == 0 {
                return Err(out_of_range(&format!("units[{}].sync_interval_ms", i), 0));
            }
            if unit.hub_wait_timeout_ms == 0 {
                return Err(out_of_range(&format!("units[{}].hub_wait_timeout_ms", i), 0));
            }

            let mut slots = HashSet::new();
            for (j, lane) in unit.lanes.iter().enumerate() {
                if lane.name.trim().is_empty() {
                    return Err(ConfigError::MissingKey(format!(
                        "units[{}].lanes[{}].name",
                        i, j
                    )));
                }
                if !lane_names.insert(lane.name.as_str()) {
                    return Err(duplicate("lane", &lane.name));
                }
                if lane.spool_index >= unit.bays {
                    return Err(out_of_range(
                        &format!("units[{}].lanes[{}].spool_index", i, j),
                        lane.spool_index,
                    ));
                }
                if !slots.insert(lane.spool_index) {
                    return Err(duplicate(
                        "spool slot",
                        &format!("{}[{}]", unit.name, lane.spool_index),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn unit(&self, name: &str) -> Option<&UnitSettings> {
        self.units.iter().find(|unit| unit.name == name)
    }
}

fn out_of_range(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::ValueOutOfRange {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn duplicate(key: &str, value: &str) -> ConfigError {
    ConfigError::Duplicate {
        key: key.to_string(),
        value: value.to_string(),
    }
}
