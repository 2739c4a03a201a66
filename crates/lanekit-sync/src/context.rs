//! Per-controller context.
//!
//! Everything that would otherwise be process-wide (the event bus, the lane
//! registry, the hardware service directory and the runout coordinator)
//! lives in one [`ControllerContext`]. Two contexts never share state.
//!
//! The record of which lane is loaded into each extruder also lives here,
//! so engines of different units feeding the same extruder agree on it.

use lanekit_core::{normalize_extruder_name, Clock, EventBus, EventBusConfig, MonotonicClock};
use lanekit_hardware::{
    ControllerLookup, HardwareDirectory, HardwareService, LaneSnapshot, RunoutCoordinator,
    RunoutMonitor,
};
use lanekit_lanedb::{LaneRecord, LaneRegistry, RegistryResult};
use lanekit_settings::UnitSettings;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

use crate::lane::LaneHandle;

/// Identity of a controller context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(Uuid);

impl ContextId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ctx({})", &self.0.to_string()[..8])
    }
}

/// An engine-owned lane as seen by the other engines of the context
#[derive(Clone)]
pub(crate) struct LaneOwner {
    pub unit: String,
    pub hardware: Arc<HardwareService>,
    pub handle: Arc<dyn LaneHandle>,
}

/// Shared services for one printer controller
pub struct ControllerContext {
    id: ContextId,
    bus: Arc<EventBus>,
    registry: Arc<LaneRegistry>,
    hardware: HardwareDirectory,
    runout: RunoutCoordinator,
    clock: Arc<dyn Clock>,
    /// Normalized extruder name to the lane loaded into it
    loaded: Mutex<HashMap<String, String>>,
    owners: Mutex<HashMap<String, LaneOwner>>,
}

impl ControllerContext {
    pub fn new() -> Arc<Self> {
        Self::builder().build()
    }

    pub fn builder() -> ControllerContextBuilder {
        ControllerContextBuilder::default()
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<LaneRegistry> {
        &self.registry
    }

    pub fn hardware(&self) -> &HardwareDirectory {
        &self.hardware
    }

    pub fn runout(&self) -> &RunoutCoordinator {
        &self.runout
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Hardware service for a unit, created on first use
    pub fn hardware_service(&self, unit_name: &str) -> Arc<HardwareService> {
        self.hardware.service(unit_name)
    }

    /// Register a runout monitor and hand back the service it watches
    pub fn register_runout_monitor(
        &self,
        unit_name: &str,
        monitor: &Arc<dyn RunoutMonitor>,
    ) -> Arc<HardwareService> {
        let service = self.hardware.service(unit_name);
        self.runout.register_monitor(service.name(), monitor);
        service
    }

    /// Lane recorded as loaded into `extruder`, whichever unit owns it
    pub fn loaded_lane(&self, extruder: &str) -> Option<String> {
        let key = normalize_extruder_name(extruder)?;
        self.loaded.lock().get(&key).cloned()
    }

    /// Every recorded extruder assignment, keyed by normalized extruder name
    pub fn loaded_lanes(&self) -> BTreeMap<String, String> {
        self.loaded
            .lock()
            .iter()
            .map(|(extruder, lane)| (extruder.clone(), lane.clone()))
            .collect()
    }

    /// Replace the record for `extruder` only if it still reads `expected`.
    ///
    /// Returns false, leaving the record alone, when another engine changed
    /// it in the meantime.
    pub(crate) fn swap_loaded_lane(
        &self,
        extruder: &str,
        expected: Option<&str>,
        lane: Option<String>,
    ) -> bool {
        let mut loaded = self.loaded.lock();
        if loaded.get(extruder).map(String::as_str) != expected {
            return false;
        }
        match lane {
            Some(lane) => loaded.insert(extruder.to_string(), lane),
            None => loaded.remove(extruder),
        };
        true
    }

    pub(crate) fn forget_loaded_lane(&self, lane: &str) {
        self.loaded.lock().retain(|_, loaded| loaded != lane);
    }

    pub(crate) fn claim_lane(&self, lane: &str, owner: LaneOwner) {
        if let Some(previous) = self.owners.lock().insert(lane.to_string(), owner) {
            tracing::debug!(lane, previous = %previous.unit, "Lane changed owner");
        }
    }

    /// Drop a lane's owner entry if `unit` still holds it
    pub(crate) fn disown_lane(&self, lane: &str, unit: &str) {
        let mut owners = self.owners.lock();
        if owners.get(lane).is_some_and(|owner| owner.unit == unit) {
            owners.remove(lane);
        }
    }

    pub(crate) fn lane_owner(&self, lane: &str) -> Option<LaneOwner> {
        self.owners.lock().get(lane).cloned()
    }

    /// Latest snapshot of a lane, read from the service of the engine that
    /// owns it, or else the newest any service holds
    pub fn lane_snapshot(&self, unit: &str, lane: &str) -> Option<LaneSnapshot> {
        if let Some(owner) = self.lane_owner(lane).filter(|owner| owner.unit == unit) {
            return owner.hardware.latest_lane_snapshot(unit, lane);
        }
        self.hardware
            .services()
            .iter()
            .filter_map(|service| service.latest_lane_snapshot(unit, lane))
            .max_by(|a, b| a.timestamp.total_cmp(&b.timestamp))
    }

    /// Register every configured lane of a unit
    pub fn register_unit_lanes(&self, unit: &UnitSettings) -> RegistryResult<Vec<Arc<LaneRecord>>> {
        unit.lanes
            .iter()
            .map(|lane| self.registry.register_lane(unit.lane_registration(lane)))
            .collect()
    }
}

impl std::fmt::Debug for ControllerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerContext")
            .field("id", &self.id)
            .field("lanes", &self.registry.len())
            .field("hardware", &self.hardware)
            .field("loaded", &self.loaded_lanes())
            .finish()
    }
}

/// Builder for [`ControllerContext`]
#[derive(Default)]
pub struct ControllerContextBuilder {
    bus_config: EventBusConfig,
    clock: Option<Arc<dyn Clock>>,
    lookup: Option<Arc<dyn ControllerLookup>>,
}

impl ControllerContextBuilder {
    pub fn bus_config(mut self, config: EventBusConfig) -> Self {
        self.bus_config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Resolve controllers by name when a service has none attached
    pub fn lookup(mut self, lookup: Arc<dyn ControllerLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn build(self) -> Arc<ControllerContext> {
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let bus = Arc::new(EventBus::with_clock(self.bus_config, Arc::clone(&clock)));
        let registry = Arc::new(LaneRegistry::new());
        let hardware =
            HardwareDirectory::new(Arc::clone(&bus), Arc::clone(&registry), Arc::clone(&clock));
        let hardware = match self.lookup {
            Some(lookup) => hardware.with_lookup(lookup),
            None => hardware,
        };

        let context = ControllerContext {
            id: ContextId::new(),
            bus,
            registry,
            hardware,
            runout: RunoutCoordinator::new(),
            clock,
            loaded: Mutex::new(HashMap::new()),
            owners: Mutex::new(HashMap::new()),
        };
        tracing::debug!(context = %context.id, "Controller context created");
        Arc::new(context)
    }
}
