use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, RegistryResult};

/// Identity of one lane as stored in the registry.
///
/// Records are immutable; re-registering a lane produces a new record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaneRecord {
    pub lane_name: String,
    pub unit_name: String,
    /// Bay index within the unit
    pub spool_index: usize,
    pub extruder: String,
    /// Logical tool token, e.g. `T4`
    pub group: Option<String>,
    pub fps_name: Option<String>,
    pub hub_name: Option<String>,
    pub led_index: Option<String>,
    pub custom_load_cmd: Option<String>,
    pub custom_unload_cmd: Option<String>,
}

impl std::fmt::Display for LaneRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}[{}] -> {})",
            self.lane_name, self.unit_name, self.spool_index, self.extruder
        )
    }
}

/// Request to register or replace a lane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaneRegistration {
    pub lane_name: String,
    pub unit_name: String,
    pub spool_index: usize,
    pub extruder: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub fps_name: Option<String>,
    #[serde(default)]
    pub hub_name: Option<String>,
    #[serde(default)]
    pub led_index: Option<String>,
    #[serde(default)]
    pub custom_load_cmd: Option<String>,
    #[serde(default)]
    pub custom_unload_cmd: Option<String>,
}

impl LaneRegistration {
    pub fn new(
        lane_name: impl Into<String>,
        unit_name: impl Into<String>,
        spool_index: usize,
        extruder: impl Into<String>,
    ) -> Self {
        Self {
            lane_name: lane_name.into(),
            unit_name: unit_name.into(),
            spool_index,
            extruder: extruder.into(),
            group: None,
            fps_name: None,
            hub_name: None,
            led_index: None,
            custom_load_cmd: None,
            custom_unload_cmd: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_fps(mut self, fps_name: impl Into<String>) -> Self {
        self.fps_name = Some(fps_name.into());
        self
    }

    pub fn with_hub(mut self, hub_name: impl Into<String>) -> Self {
        self.hub_name = Some(hub_name.into());
        self
    }

    pub fn with_led_index(mut self, led_index: impl Into<String>) -> Self {
        self.led_index = Some(led_index.into());
        self
    }

    pub fn with_commands(
        mut self,
        load: Option<impl Into<String>>,
        unload: Option<impl Into<String>>,
    ) -> Self {
        self.custom_load_cmd = load.map(Into::into);
        self.custom_unload_cmd = unload.map(Into::into);
        self
    }

    /// Check required fields and build the stored record.
    ///
    /// Names are trimmed; blank optional fields become `None`.
    pub fn into_record(self) -> RegistryResult<LaneRecord> {
        let lane_name = self.lane_name.trim().to_string();
        if lane_name.is_empty() {
            return Err(RegistryError::MissingField("lane_name".to_string()));
        }
        let unit_name = self.unit_name.trim().to_string();
        if unit_name.is_empty() {
            return Err(RegistryError::MissingField("unit_name".to_string()));
        }

        Ok(LaneRecord {
            lane_name,
            unit_name,
            spool_index: self.spool_index,
            extruder: self.extruder.trim().to_string(),
            group: non_blank(self.group),
            fps_name: non_blank(self.fps_name),
            hub_name: non_blank(self.hub_name),
            led_index: non_blank(self.led_index),
            custom_load_cmd: non_blank(self.custom_load_cmd),
            custom_unload_cmd: non_blank(self.custom_unload_cmd),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_record_trims_and_drops_blank_fields() {
        let record = LaneRegistration::new(" lane4 ", "AMS_1", 3, "extruder4")
            .with_group("T4")
            .with_hub("  ")
            .into_record()
            .unwrap();

        assert_eq!(record.lane_name, "lane4");
        assert_eq!(record.group.as_deref(), Some("T4"));
        assert_eq!(record.hub_name, None);
    }

    #[test]
    fn test_into_record_requires_names() {
        let err = LaneRegistration::new("", "AMS_1", 0, "extruder")
            .into_record()
            .unwrap_err();
        assert_eq!(err, RegistryError::MissingField("lane_name".to_string()));

        let err = LaneRegistration::new("lane1", " ", 0, "extruder")
            .into_record()
            .unwrap_err();
        assert_eq!(err, RegistryError::MissingField("unit_name".to_string()));
    }

    #[test]
    fn test_registration_deserializes_with_defaults() {
        let json = r#"{"lane_name":"lane1","unit_name":"AMS_1","spool_index":0,"extruder":"extruder"}"#;
        let registration: LaneRegistration = serde_json::from_str(json).unwrap();
        assert_eq!(registration.group, None);
        assert_eq!(registration.spool_index, 0);
    }
}
