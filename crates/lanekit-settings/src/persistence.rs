//! Persisted unit state.
//!
//! The printer host writes a JSON variables file shaped like
//!
//! ```json
//! {
//!   "AMS_1": { "lane4": { "extruder_temp": 220, "runout_lane": "lane5" } },
//!   "system": { "extruders": { "extruder4": { "lane_loaded": "lane4" } } }
//! }
//! ```
//!
//! LaneKit only reads it. A missing or unreadable file is an empty state.

use chrono::{DateTime, Utc};
use lanekit_core::normalize_extruder_name;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{ConfigError, SettingsResult};

const SYSTEM_KEY: &str = "system";

/// Read-only view of the persisted variables file
#[derive(Debug, Clone, Default)]
pub struct PersistedUnitState {
    units: HashMap<String, HashMap<String, Map<String, Value>>>,
    /// Keyed by normalized extruder name
    lane_loaded: HashMap<String, String>,
    loaded_at: Option<DateTime<Utc>>,
}

impl PersistedUnitState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Strict parse; the document must be a JSON object
    pub fn parse(content: &str) -> SettingsResult<Self> {
        let root: Value = serde_json::from_str(content)?;
        let Value::Object(root) = root else {
            return Err(ConfigError::Corrupted("top level is not an object".to_string()).into());
        };

        let mut state = Self {
            loaded_at: Some(Utc::now()),
            ..Self::default()
        };

        for (key, value) in root {
            if key == SYSTEM_KEY {
                state.read_system(&value);
                continue;
            }
            let Value::Object(lanes) = value else {
                continue;
            };
            let lanes = lanes
                .into_iter()
                .filter_map(|(lane, fields)| match fields {
                    Value::Object(fields) => Some((lane, fields)),
                    _ => None,
                })
                .collect();
            state.units.insert(key, lanes);
        }

        Ok(state)
    }

    fn read_system(&mut self, system: &Value) {
        let Some(extruders) = system.get("extruders").and_then(Value::as_object) else {
            return;
        };
        for (name, fields) in extruders {
            let lane = fields
                .get("lane_loaded")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|lane| !lane.is_empty());
            if let (Some(key), Some(lane)) = (normalize_extruder_name(name), lane) {
                self.lane_loaded.insert(key, lane.to_string());
            }
        }
    }

    /// Lenient parse: a corrupt document logs a warning and yields an empty state
    pub fn from_json_str(content: &str) -> Self {
        match Self::parse(content) {
            Ok(state) => state,
            Err(err) => {
                tracing::warn!(error = %err, "Ignoring corrupt persisted state");
                Self::empty()
            }
        }
    }

    /// Load from disk; missing or unreadable files give an empty state
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let state = Self::from_json_str(&content);
                tracing::debug!(
                    path = %path.display(),
                    units = state.units.len(),
                    "Loaded persisted state"
                );
                state
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::empty(),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Cannot read persisted state");
                Self::empty()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty() && self.lane_loaded.is_empty()
    }

    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    pub fn unit_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.units.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// A field of one lane under one unit
    pub fn lane_field(&self, unit: &str, lane: &str, field: &str) -> Option<&Value> {
        self.units.get(unit)?.get(lane)?.get(field)
    }

    /// A field of a lane under whichever unit holds it
    pub fn find_lane_field(&self, lane: &str, field: &str) -> Option<&Value> {
        let mut units: Vec<_> = self.units.iter().collect();
        units.sort_unstable_by(|a, b| a.0.cmp(b.0));
        units
            .into_iter()
            .find_map(|(_, lanes)| lanes.get(lane)?.get(field))
    }

    /// Lane recorded as loaded into `extruder`
    pub fn lane_loaded(&self, extruder: &str) -> Option<&str> {
        let key = normalize_extruder_name(extruder)?;
        self.lane_loaded.get(&key).map(String::as_str)
    }

    /// Persisted runout target for a lane
    pub fn runout_lane(&self, unit: &str, lane: &str) -> Option<&str> {
        let value = match self.lane_field(unit, lane, "runout_lane") {
            Some(value) => value,
            None => self.find_lane_field(lane, "runout_lane")?,
        };
        value
            .as_str()
            .map(str::trim)
            .filter(|target| !target.is_empty())
    }

    /// `extruder_temp` for a lane, as a number or numeric string
    pub fn lane_temperature(&self, unit: &str, lane: &str) -> Option<f64> {
        match self.lane_field(unit, lane, "extruder_temp")? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

struct CacheEntry {
    modified: Option<SystemTime>,
    state: Arc<PersistedUnitState>,
}

/// Persisted state that is reread only when the file's mtime changes
pub struct PersistedStateCache {
    path: PathBuf,
    entry: Mutex<Option<CacheEntry>>,
}

impl PersistedStateCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entry: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok()
    }

    /// Current state, reloading if the file changed since the last read
    pub fn current(&self) -> Arc<PersistedUnitState> {
        let modified = self.modified();
        let mut entry = self.entry.lock();
        if let Some(cached) = entry.as_ref() {
            if cached.modified == modified {
                return Arc::clone(&cached.state);
            }
        }

        let state = Arc::new(match modified {
            Some(_) => PersistedUnitState::load(&self.path),
            None => PersistedUnitState::empty(),
        });
        *entry = Some(CacheEntry {
            modified,
            state: Arc::clone(&state),
        });
        state
    }

    pub fn lane_temperature(&self, unit: &str, lane: &str, default: f64) -> f64 {
        self.current().lane_temperature(unit, lane).unwrap_or(default)
    }

    pub fn invalidate(&self) {
        *self.entry.lock() = None;
    }
}

impl std::fmt::Debug for PersistedStateCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedStateCache")
            .field("path", &self.path)
            .field("cached", &self.entry.lock().is_some())
            .finish()
    }
}
