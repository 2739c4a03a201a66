//! Hardware service for one feeder unit.
//!
//! Wraps a [`FeederController`] and owns the per-lane sensor snapshots.
//! [`HardwareService::update_lane_snapshot`] is the only place sensor edges
//! are detected; every edge is published on the context's event bus.
//!
//! All mutable state sits behind one mutex that is released before any
//! event is published or observer is called, so subscribers may call back
//! into the service.

use lanekit_core::{payload, Clock, EventBus, EventPayload, EventType, HardwareError};
use lanekit_lanedb::LaneRegistry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::controller::{ControllerLookup, ControllerStatus, FeederController};
use crate::snapshot::{LaneObservation, LaneSnapshot, SOURCE_COMMAND, SOURCE_SENSOR};

/// Poll period while waiting for a hub sensor after a load
const HUB_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Handle returned when registering a status observer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Obs({})", &self.0.to_string()[..8])
    }
}

/// Callback receiving every polled status
pub type StatusObserver = Arc<dyn Fn(&ControllerStatus) -> anyhow::Result<()> + Send + Sync>;

#[derive(Default)]
struct ServiceState {
    controller: Option<Arc<dyn FeederController>>,
    latest_status: Option<ControllerStatus>,
    snapshots: HashMap<(String, String), LaneSnapshot>,
    observers: Vec<(ObserverId, StatusObserver)>,
}

/// Hardware service for one feeder unit
pub struct HardwareService {
    name: String,
    bus: Arc<EventBus>,
    registry: Arc<LaneRegistry>,
    clock: Arc<dyn Clock>,
    lookup: Option<Arc<dyn ControllerLookup>>,
    state: Mutex<ServiceState>,
}

impl HardwareService {
    pub fn new(
        name: impl Into<String>,
        bus: Arc<EventBus>,
        registry: Arc<LaneRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            bus,
            registry,
            clock,
            lookup: None,
            state: Mutex::new(ServiceState::default()),
        }
    }

    /// Resolve the controller lazily through `lookup` when none is attached
    pub fn with_lookup(mut self, lookup: Arc<dyn ControllerLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Hardware unit name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attach_controller(&self, controller: Arc<dyn FeederController>) {
        self.state.lock().controller = Some(Arc::clone(&controller));
        tracing::debug!(unit = %self.name, controller = %controller.name(), "Controller attached");

        match controller.get_status(self.clock.monotonic()) {
            Ok(status) => self.update_status(status),
            Err(err) => {
                tracing::debug!(unit = %self.name, error = %err, "Initial status read failed")
            }
        }
    }

    pub fn detach_controller(&self) -> Option<Arc<dyn FeederController>> {
        self.state.lock().controller.take()
    }

    /// Attached controller, or one found through the lookup
    pub fn resolve_controller(&self) -> Option<Arc<dyn FeederController>> {
        let attached = self.state.lock().controller.clone();
        if attached.is_some() {
            return attached;
        }

        let controller = self.lookup.as_ref()?.lookup_controller(&self.name)?;
        let mut state = self.state.lock();
        let controller = state.controller.get_or_insert(controller).clone();
        drop(state);
        tracing::debug!(unit = %self.name, "Controller resolved through lookup");
        Some(controller)
    }

    pub fn is_ready(&self) -> bool {
        self.resolve_controller().is_some()
    }

    fn require_controller(&self) -> Result<Arc<dyn FeederController>, HardwareError> {
        self.resolve_controller().ok_or_else(|| HardwareError::NotReady {
            unit: self.name.clone(),
        })
    }

    /// Read the controller status
    ///
    /// A failed read falls back to the controller's cached fields and marks
    /// the status degraded. Returns `None` only when no controller exists.
    pub fn poll_status(&self) -> Option<ControllerStatus> {
        let controller = self.resolve_controller()?;
        let eventtime = self.clock.monotonic();
        let status = match controller.get_status(eventtime) {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(
                    unit = %self.name,
                    error = %err,
                    "Status read failed, using last known controller fields"
                );
                controller.best_known_status()
            }
        };
        self.update_status(status.clone());
        Some(status)
    }

    /// Store a status and notify observers
    pub fn update_status(&self, status: ControllerStatus) {
        let observers: Vec<(ObserverId, StatusObserver)> = {
            let mut state = self.state.lock();
            state.latest_status = Some(status.clone());
            state.observers.clone()
        };

        for (id, observer) in observers {
            match panic::catch_unwind(AssertUnwindSafe(|| observer(&status))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(unit = %self.name, observer = %id, error = %err, "Status observer failed")
                }
                Err(_) => {
                    tracing::error!(unit = %self.name, observer = %id, "Status observer panicked")
                }
            }
        }
    }

    pub fn latest_status(&self) -> Option<ControllerStatus> {
        self.state.lock().latest_status.clone()
    }

    pub fn register_status_observer<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&ControllerStatus) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ObserverId(Uuid::new_v4());
        self.state.lock().observers.push((id, Arc::new(observer)));
        tracing::debug!(unit = %self.name, "Status observer {} added", id);
        id
    }

    pub fn unregister_status_observer(&self, id: ObserverId) -> bool {
        let mut state = self.state.lock();
        let before = state.observers.len();
        state.observers.retain(|(existing, _)| *existing != id);
        state.observers.len() != before
    }

    /// Record a sensor observation and publish an event for every edge.
    ///
    /// Edges are published in lane, hub, tool order. A `None` hub or tool
    /// reading leaves the stored value alone. Returns the published event
    /// types.
    pub fn update_lane_snapshot(&self, observation: LaneObservation) -> Vec<EventType> {
        let mut edges: Vec<(EventType, Option<bool>)> = Vec::new();
        let spool_index = {
            let mut state = self.state.lock();
            let snapshot = state
                .snapshots
                .entry((observation.unit.clone(), observation.lane.clone()))
                .or_insert_with(|| LaneSnapshot::new(&observation.unit, &observation.lane));

            let previous = snapshot.lane_state;
            if previous != Some(observation.lane_state) {
                snapshot.lane_state = Some(observation.lane_state);
                if observation.emit_spool_event {
                    edges.push((EventType::spool(observation.lane_state), previous));
                }
            }

            if let Some(hub) = observation.hub_state {
                let previous = snapshot.hub_state;
                if previous != Some(hub) {
                    snapshot.hub_state = Some(hub);
                    edges.push((EventType::hub(hub), previous));
                }
            }

            if let Some(tool) = observation.tool_state {
                let previous = snapshot.tool_state;
                if previous != Some(tool) {
                    snapshot.tool_state = Some(tool);
                    edges.push((EventType::tool(tool), previous));
                }
            }

            snapshot.timestamp = observation.eventtime;
            if observation.spool_index.is_some() {
                snapshot.spool_index = observation.spool_index;
            }
            snapshot.spool_index
        };

        let spool_index =
            spool_index.or_else(|| self.registry.resolve_spool_index(&observation.lane));

        for (event_type, previous) in &edges {
            tracing::debug!(
                unit = %observation.unit,
                lane = %observation.lane,
                "Sensor edge {}",
                event_type
            );
            let payload = payload! {
                "unit_name" => observation.unit.as_str(),
                "lane_name" => observation.lane.as_str(),
                "spool_index" => spool_index,
                "eventtime" => observation.eventtime,
                "previous" => *previous,
                "source" => SOURCE_SENSOR,
                "hardware" => self.name.as_str(),
            };
            self.bus.publish(event_type.clone(), payload);
        }

        edges.into_iter().map(|(event_type, _)| event_type).collect()
    }

    pub fn latest_lane_snapshot(&self, unit: &str, lane: &str) -> Option<LaneSnapshot> {
        self.state
            .lock()
            .snapshots
            .get(&(unit.to_string(), lane.to_string()))
            .cloned()
    }

    /// Lane occupying a bay: the registry first, then recorded snapshots
    pub fn resolve_lane_for_spool(&self, unit: &str, spool_index: usize) -> Option<String> {
        if let Some(lane) = self.registry.resolve_lane_name(unit, spool_index) {
            return Some(lane);
        }
        self.state
            .lock()
            .snapshots
            .values()
            .find(|snapshot| snapshot.unit == unit && snapshot.spool_index == Some(spool_index))
            .map(|snapshot| snapshot.lane.clone())
    }

    pub fn latest_lane_snapshot_for_spool(
        &self,
        unit: &str,
        spool_index: usize,
    ) -> Option<LaneSnapshot> {
        let lane = self.resolve_lane_for_spool(unit, spool_index)?;
        self.latest_lane_snapshot(unit, &lane)
    }

    /// Every recorded snapshot, ordered by unit then lane
    pub fn lane_snapshots(&self) -> Vec<LaneSnapshot> {
        let mut snapshots: Vec<_> = self.state.lock().snapshots.values().cloned().collect();
        snapshots.sort_by(|a, b| (&a.unit, &a.lane).cmp(&(&b.unit, &b.lane)));
        snapshots
    }

    pub fn load_spool(&self, spool_index: usize) -> Result<(), HardwareError> {
        let controller = self.require_controller()?;
        controller
            .load_spool(spool_index)
            .map_err(|err| self.command_failed("load_spool", err))?;
        tracing::info!(unit = %self.name, spool_index, "Load spool sent");

        self.publish_command(EventType::SpoolLoaded, Some(spool_index));
        Ok(())
    }

    pub fn unload_spool(&self) -> Result<(), HardwareError> {
        let controller = self.require_controller()?;
        let spool_index = controller.current_spool().or_else(|| {
            self.latest_status()
                .and_then(|status| status.current_spool)
        });
        controller
            .unload_spool()
            .map_err(|err| self.command_failed("unload_spool", err))?;
        tracing::info!(unit = %self.name, spool_index = ?spool_index, "Unload spool sent");

        self.publish_command(EventType::SpoolUnloaded, spool_index);
        Ok(())
    }

    pub fn set_follower(&self, enable: bool, direction: i32) -> Result<(), HardwareError> {
        let controller = self.require_controller()?;
        controller
            .set_follower(enable, direction)
            .map_err(|err| self.command_failed("set_follower", err))?;

        self.bus.publish(
            EventType::FollowerChanged,
            payload! {
                "unit_name" => self.name.as_str(),
                "enable" => enable,
                "direction" => direction,
                "eventtime" => self.clock.monotonic(),
                "source" => SOURCE_COMMAND,
            },
        );
        Ok(())
    }

    pub fn set_led_error(&self, spool_index: usize, value: u8) -> Result<(), HardwareError> {
        let controller = self.require_controller()?;
        controller
            .set_led_error(spool_index, value)
            .map_err(|err| self.command_failed("set_led_error", err))
    }

    /// Load a spool and wait until its hub sensor reports filament.
    ///
    /// The deadline is fixed when the call starts.
    pub async fn load_spool_and_wait(
        &self,
        spool_index: usize,
        timeout: Duration,
    ) -> Result<(), HardwareError> {
        let deadline = Instant::now() + timeout;
        self.load_spool(spool_index)?;

        loop {
            let hub = self
                .poll_status()
                .and_then(|status| status.hub_sensor(spool_index));
            if hub == Some(true) {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    unit = %self.name,
                    spool_index,
                    "Hub sensor did not trigger within {:?}",
                    timeout
                );
                return Err(HardwareError::Timeout {
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                });
            }
            tokio::time::sleep(HUB_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    fn command_failed(&self, command: &str, err: anyhow::Error) -> HardwareError {
        tracing::error!(unit = %self.name, command, error = %err, "Controller command failed");
        HardwareError::CommandFailed {
            command: command.to_string(),
            reason: format!("{:#}", err),
        }
    }

    /// Lane currently bound to a bay of this unit, with the lane's owning unit.
    ///
    /// A lane registered under the hardware name wins. Otherwise the
    /// snapshots in that bay are checked against the registry of their own
    /// unit, then the most recently observed snapshot is used, with ties
    /// broken by unit and lane name.
    fn lane_for_bay(&self, spool_index: usize) -> Option<(String, String)> {
        if let Some(record) = self.registry.get_by_spool(&self.name, spool_index) {
            return Some((record.unit_name.clone(), record.lane_name.clone()));
        }

        let mut candidates: Vec<LaneSnapshot> = self
            .state
            .lock()
            .snapshots
            .values()
            .filter(|snapshot| snapshot.spool_index == Some(spool_index))
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            b.timestamp
                .total_cmp(&a.timestamp)
                .then_with(|| (&a.unit, &a.lane).cmp(&(&b.unit, &b.lane)))
        });

        let registered: Vec<&LaneSnapshot> = candidates
            .iter()
            .filter(|snapshot| {
                self.registry
                    .get_by_spool(&snapshot.unit, spool_index)
                    .is_some_and(|record| record.lane_name == snapshot.lane)
            })
            .collect();
        if registered.len() > 1 {
            tracing::warn!(
                unit = %self.name,
                spool_index,
                lanes = ?registered.iter().map(|s| s.lane.as_str()).collect::<Vec<_>>(),
                "Several units registered on one bay, using the latest observed"
            );
        }

        registered
            .first()
            .copied()
            .or(candidates.first())
            .map(|snapshot| (snapshot.unit.clone(), snapshot.lane.clone()))
    }

    fn publish_command(&self, event_type: EventType, spool_index: Option<usize>) {
        let mut payload: EventPayload = payload! {
            "unit_name" => self.name.as_str(),
            "spool_index" => spool_index,
            "eventtime" => self.clock.monotonic(),
            "source" => SOURCE_COMMAND,
            "hardware" => self.name.as_str(),
        };
        if let Some((unit, lane)) = spool_index.and_then(|index| self.lane_for_bay(index)) {
            payload.insert("lane_unit", unit);
            payload.insert("lane_name", lane);
        }
        self.bus.publish(event_type, payload);
    }
}

impl std::fmt::Debug for HardwareService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HardwareService")
            .field("name", &self.name)
            .field("attached", &state.controller.is_some())
            .field("snapshots", &state.snapshots.len())
            .finish()
    }
}
