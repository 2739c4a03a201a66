//! Lane identity registry.
//!
//! One registry exists per controller context. It maps a lane to its unit,
//! bay, extruder and tool token, and answers the reverse lookups the
//! hardware and sync layers need. All indexes live behind a single lock so
//! a re-registration replaces every entry in one critical section.

use lanekit_core::{normalize_group_name, same_extruder};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RegistryResult;
use crate::model::{LaneRecord, LaneRegistration};

#[derive(Default)]
struct Indexes {
    by_lane: HashMap<String, Arc<LaneRecord>>,
    /// Lowercased lane name to lane name
    by_lane_folded: HashMap<String, String>,
    by_spool: HashMap<(String, usize), Arc<LaneRecord>>,
    /// Registration order within each extruder
    by_extruder: HashMap<String, Vec<Arc<LaneRecord>>>,
    /// Lowercased group key to record
    by_group: HashMap<String, Arc<LaneRecord>>,
}

impl Indexes {
    fn remove(&mut self, record: &Arc<LaneRecord>) {
        self.by_lane.remove(&record.lane_name);
        let folded = record.lane_name.to_lowercase();
        if self.by_lane_folded.get(&folded) == Some(&record.lane_name) {
            self.by_lane_folded.remove(&folded);
        }

        let spool_key = (record.unit_name.clone(), record.spool_index);
        if self
            .by_spool
            .get(&spool_key)
            .is_some_and(|current| Arc::ptr_eq(current, record))
        {
            self.by_spool.remove(&spool_key);
        }

        if let Some(lanes) = self.by_extruder.get_mut(&record.extruder) {
            lanes.retain(|current| !Arc::ptr_eq(current, record));
            if lanes.is_empty() {
                self.by_extruder.remove(&record.extruder);
            }
        }

        for key in group_keys(record.group.as_deref()) {
            if self
                .by_group
                .get(&key)
                .is_some_and(|current| Arc::ptr_eq(current, record))
            {
                self.by_group.remove(&key);
            }
        }
    }

    fn insert(&mut self, record: &Arc<LaneRecord>) {
        self.by_lane
            .insert(record.lane_name.clone(), Arc::clone(record));
        self.by_lane_folded
            .insert(record.lane_name.to_lowercase(), record.lane_name.clone());

        let spool_key = (record.unit_name.clone(), record.spool_index);
        if let Some(displaced) = self.by_spool.insert(spool_key, Arc::clone(record)) {
            if displaced.lane_name != record.lane_name {
                tracing::warn!(
                    unit = %record.unit_name,
                    spool_index = record.spool_index,
                    displaced = %displaced.lane_name,
                    lane = %record.lane_name,
                    "Spool slot reassigned to another lane"
                );
            }
        }

        self.by_extruder
            .entry(record.extruder.clone())
            .or_default()
            .push(Arc::clone(record));

        for key in group_keys(record.group.as_deref()) {
            self.by_group.insert(key, Arc::clone(record));
        }
    }

    fn lookup_name(&self, token: &str) -> Option<Arc<LaneRecord>> {
        if let Some(record) = self.by_lane.get(token) {
            return Some(Arc::clone(record));
        }
        self.by_lane_folded
            .get(&token.to_lowercase())
            .and_then(|name| self.by_lane.get(name))
            .cloned()
    }

    fn lookup_group(&self, token: &str) -> Option<Arc<LaneRecord>> {
        group_keys(Some(token))
            .into_iter()
            .find_map(|key| self.by_group.get(&key).cloned())
    }
}

/// Keys a group token is indexed under: the full token and its last word.
fn group_keys(group: Option<&str>) -> Vec<String> {
    let Some(group) = group.map(str::trim).filter(|g| !g.is_empty()) else {
        return Vec::new();
    };
    let mut keys = vec![group.to_lowercase()];
    if let Some(short) = normalize_group_name(group) {
        let short = short.to_lowercase();
        if short != keys[0] {
            keys.push(short);
        }
    }
    keys
}

/// Token with its leading type marker removed, e.g. `lane:lane4` or `Tool T4`.
fn strip_type_marker(token: &str) -> Option<&str> {
    let stripped = match token.rfind(':') {
        Some(pos) => token[pos + 1..].trim(),
        None => token.split_whitespace().last()?,
    };
    (!stripped.is_empty() && stripped != token).then_some(stripped)
}

/// Registry of lane identities for one controller context.
#[derive(Default)]
pub struct LaneRegistry {
    indexes: RwLock<Indexes>,
}

impl LaneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a lane, replacing any earlier registration of the same name.
    ///
    /// The returned record is always a fresh allocation; index entries of
    /// the previous record are dropped before the new ones are written.
    pub fn register_lane(&self, registration: LaneRegistration) -> RegistryResult<Arc<LaneRecord>> {
        let record = Arc::new(registration.into_record()?);
        let mut indexes = self.indexes.write();
        if let Some(previous) = indexes.by_lane.get(&record.lane_name).cloned() {
            indexes.remove(&previous);
            tracing::debug!(lane = %record.lane_name, "Replacing lane registration");
        }
        indexes.insert(&record);
        tracing::debug!("Registered lane {}", record);
        Ok(record)
    }

    /// Remove a lane from every index.
    pub fn unregister_lane(&self, lane_name: &str) -> Option<Arc<LaneRecord>> {
        let mut indexes = self.indexes.write();
        let record = indexes.by_lane.get(lane_name).cloned()?;
        indexes.remove(&record);
        tracing::debug!(lane = %lane_name, "Unregistered lane");
        Some(record)
    }

    pub fn get_by_lane(&self, lane_name: &str) -> Option<Arc<LaneRecord>> {
        self.indexes.read().by_lane.get(lane_name).cloned()
    }

    pub fn get_by_spool(&self, unit_name: &str, spool_index: usize) -> Option<Arc<LaneRecord>> {
        self.indexes
            .read()
            .by_spool
            .get(&(unit_name.to_string(), spool_index))
            .cloned()
    }

    /// Lanes feeding an extruder, in registration order
    pub fn get_by_extruder(&self, extruder: &str) -> Vec<Arc<LaneRecord>> {
        self.indexes
            .read()
            .by_extruder
            .get(extruder)
            .cloned()
            .unwrap_or_default()
    }

    /// Lane owning a group token; case-insensitive, `"Group T4"` matches `T4`
    pub fn get_by_group(&self, group: &str) -> Option<Arc<LaneRecord>> {
        self.indexes.read().lookup_group(group)
    }

    /// Resolve a free-form lane reference.
    ///
    /// Tries the lane name (exact, then case-insensitive), then the group
    /// token, then both again with a leading type marker stripped.
    pub fn resolve_lane_token(&self, token: &str) -> Option<Arc<LaneRecord>> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        let indexes = self.indexes.read();
        indexes
            .lookup_name(token)
            .or_else(|| indexes.lookup_group(token))
            .or_else(|| {
                let stripped = strip_type_marker(token)?;
                indexes
                    .lookup_name(stripped)
                    .or_else(|| indexes.lookup_group(stripped))
            })
    }

    pub fn resolve_spool_index(&self, lane_name: &str) -> Option<usize> {
        self.get_by_lane(lane_name).map(|record| record.spool_index)
    }

    pub fn resolve_extruder(&self, lane_name: &str) -> Option<String> {
        self.get_by_lane(lane_name)
            .map(|record| record.extruder.clone())
    }

    pub fn resolve_lane_name(&self, unit_name: &str, spool_index: usize) -> Option<String> {
        self.get_by_spool(unit_name, spool_index)
            .map(|record| record.lane_name.clone())
    }

    pub fn resolve_group(&self, unit_name: &str, spool_index: usize) -> Option<String> {
        self.get_by_spool(unit_name, spool_index)
            .and_then(|record| record.group.clone())
    }

    /// Lanes feeding an extruder under any spelling of its name, across
    /// every unit, ordered by unit then bay
    pub fn lanes_for_extruder(&self, extruder: &str) -> Vec<Arc<LaneRecord>> {
        let mut lanes: Vec<_> = self
            .indexes
            .read()
            .by_extruder
            .iter()
            .filter(|(name, _)| same_extruder(name, extruder))
            .flat_map(|(_, records)| records.iter().cloned())
            .collect();
        lanes.sort_by(|a, b| {
            (a.unit_name.as_str(), a.spool_index).cmp(&(b.unit_name.as_str(), b.spool_index))
        });
        lanes
    }

    /// Lanes of one unit ordered by bay index
    pub fn lanes_for_unit(&self, unit_name: &str) -> Vec<Arc<LaneRecord>> {
        let mut lanes: Vec<_> = self
            .indexes
            .read()
            .by_lane
            .values()
            .filter(|record| record.unit_name == unit_name)
            .cloned()
            .collect();
        lanes.sort_by_key(|record| record.spool_index);
        lanes
    }

    pub fn len(&self) -> usize {
        self.indexes.read().by_lane.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.read().by_lane.is_empty()
    }
}

impl std::fmt::Debug for LaneRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaneRegistry")
            .field("lanes", &self.len())
            .finish()
    }
}
