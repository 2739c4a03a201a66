//! Sync engine for one lane-owning unit.
//!
//! The engine listens to sensor edges for its lanes, reconciles which lane
//! is loaded into each extruder they feed, and classifies runouts. The
//! loaded-lane record is kept in the [`ControllerContext`] so engines of
//! different units feeding one extruder share it. The engine's own state
//! sits behind a mutex that is never held while calling a collaborator,
//! the hardware service or the bus, since any of those may call straight
//! back into the engine.

use lanekit_core::{
    normalize_extruder_name, payload, same_extruder, Event, EventPayload, EventType,
    SubscriptionId,
};
use lanekit_hardware::{
    ControllerStatus, HardwareService, LaneObservation, RunoutConsumer, SOURCE_SENSOR,
};
use lanekit_lanedb::LaneRecord;
use lanekit_settings::{PersistedStateCache, UnitSettings};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::context::{ControllerContext, LaneOwner};
use crate::error::{SyncError, SyncResult};
use crate::lane::{LaneBinding, LaneHandle, LaneState, LaneStatus, PrinterHost};
use crate::reconcile::{reconcile, LaneReading, Reconciliation};
use crate::runout::RunoutOutcome;

/// Event types the engine subscribes to
const SUBSCRIBED_EVENTS: [EventType; 6] = [
    EventType::SpoolLoaded,
    EventType::SpoolUnloaded,
    EventType::LaneHubLoaded,
    EventType::LaneHubUnloaded,
    EventType::LaneToolLoaded,
    EventType::LaneToolUnloaded,
];

/// Configuration for a [`SyncEngine`]
#[derive(Debug, Clone)]
pub struct SyncEngineConfig {
    /// Unit the lanes are registered under
    pub unit: String,
    /// Hardware service driving the unit
    pub hardware: String,
    pub sync_interval: Duration,
    pub persisted: Option<Arc<PersistedStateCache>>,
}

impl SyncEngineConfig {
    pub fn new(unit: impl Into<String>, hardware: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            hardware: hardware.into(),
            sync_interval: Duration::from_secs(1),
            persisted: None,
        }
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_persisted_state(mut self, cache: Arc<PersistedStateCache>) -> Self {
        self.persisted = Some(cache);
        self
    }

    pub fn from_settings(unit: &UnitSettings, var_file: Option<PathBuf>) -> Self {
        Self {
            unit: unit.name.clone(),
            hardware: unit.hardware.clone(),
            sync_interval: unit.sync_interval(),
            persisted: var_file.map(|path| Arc::new(PersistedStateCache::new(path))),
        }
    }
}

#[derive(Default)]
struct EngineState {
    lanes: BTreeMap<String, LaneBinding>,
    /// Lanes whose same-extruder runout is still awaiting a reload
    runout: HashSet<String>,
    /// Lanes with a runout being dispatched right now
    dispatching: HashSet<String>,
    feed_activity: HashSet<String>,
    /// Extruders whose reconciliation waits for the running sync to finish
    pending: Option<BTreeSet<String>>,
    /// Set once every owned extruder was reconciled after a sync
    reconciled: bool,
    last_encoder: Option<i64>,
    subscriptions: Vec<(EventType, SubscriptionId)>,
}

/// Lane synchronization for one unit
pub struct SyncEngine {
    unit: String,
    context: Arc<ControllerContext>,
    hardware: Arc<HardwareService>,
    host: Arc<dyn PrinterHost>,
    persisted: Option<Arc<PersistedStateCache>>,
    sync_interval: Duration,
    state: Mutex<EngineState>,
}

impl SyncEngine {
    pub fn new(
        context: Arc<ControllerContext>,
        config: SyncEngineConfig,
        host: Arc<dyn PrinterHost>,
    ) -> Arc<Self> {
        let hardware = context.hardware_service(&config.hardware);
        Arc::new(Self {
            unit: config.unit,
            context,
            hardware,
            host,
            persisted: config.persisted,
            sync_interval: config.sync_interval,
            state: Mutex::new(EngineState::default()),
        })
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn hardware(&self) -> &Arc<HardwareService> {
        &self.hardware
    }

    pub fn context(&self) -> &Arc<ControllerContext> {
        &self.context
    }

    /// True once a controller is attached to the hardware service
    pub fn ready(&self) -> bool {
        self.hardware.is_ready()
    }

    /// Register a lane with the context registry and take ownership of it
    pub fn add_lane(&self, binding: LaneBinding) -> SyncResult<Arc<LaneRecord>> {
        let record = self
            .context
            .registry()
            .register_lane(binding.config.registration(&self.unit))?;
        tracing::debug!(unit = %self.unit, lane = %record, "Lane added");
        self.context.claim_lane(
            &record.lane_name,
            LaneOwner {
                unit: self.unit.clone(),
                hardware: Arc::clone(&self.hardware),
                handle: Arc::clone(&binding.handle),
            },
        );
        let mut state = self.state.lock();
        state.lanes.insert(record.lane_name.clone(), binding);
        state.reconciled = false;
        Ok(record)
    }

    pub fn remove_lane(&self, lane: &str) -> Option<LaneBinding> {
        let binding = {
            let mut state = self.state.lock();
            state.runout.remove(lane);
            state.feed_activity.remove(lane);
            state.lanes.remove(lane)?
        };
        self.context.forget_loaded_lane(lane);
        self.context.disown_lane(lane, &self.unit);
        let registry = self.context.registry();
        if registry
            .get_by_lane(lane)
            .is_some_and(|record| record.unit_name == self.unit)
        {
            registry.unregister_lane(lane);
        }
        Some(binding)
    }

    pub fn lane_names(&self) -> Vec<String> {
        self.state.lock().lanes.keys().cloned().collect()
    }

    /// Subscribe to sensor edges and register as the unit's runout consumer.
    ///
    /// Calling it again is a no-op.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if !state.subscriptions.is_empty() {
                return;
            }
            for event_type in SUBSCRIBED_EVENTS {
                let engine = Arc::downgrade(self);
                let id = self
                    .context
                    .bus()
                    .subscribe(event_type.clone(), 0, move |event: &Event| {
                        match engine.upgrade() {
                            Some(engine) => engine.handle_event(event),
                            None => Ok(()),
                        }
                    });
                state.subscriptions.push((event_type, id));
            }
        }

        let consumer: Arc<dyn RunoutConsumer> = self.clone();
        self.context
            .runout()
            .register_consumer(self.hardware.name(), &consumer);
        tracing::info!(
            unit = %self.unit,
            hardware = %self.hardware.name(),
            context = %self.context.id(),
            "Sync engine started"
        );
    }

    pub fn stop(self: &Arc<Self>) {
        let subscriptions = std::mem::take(&mut self.state.lock().subscriptions);
        for (event_type, id) in subscriptions {
            self.context.bus().unsubscribe(event_type, id);
        }
        let consumer: Arc<dyn RunoutConsumer> = self.clone();
        self.context
            .runout()
            .unregister_consumer(self.hardware.name(), &consumer);
        tracing::info!(unit = %self.unit, "Sync engine stopped");
    }

    fn handle_event(&self, event: &Event) -> anyhow::Result<()> {
        let payload = &event.payload;
        let Some(lane) = self.event_lane(payload) else {
            return Ok(());
        };
        let eventtime = payload
            .eventtime()
            .unwrap_or_else(|| self.context.clock().monotonic());
        let from_sensor = payload.get_str("source") == Some(SOURCE_SENSOR);

        match &event.event_type {
            EventType::SpoolLoaded | EventType::SpoolUnloaded => {
                let present = event.event_type == EventType::SpoolLoaded;
                if from_sensor {
                    self.on_feed_edge(&lane, present, payload.get_bool("previous"), eventtime)?;
                } else {
                    tracing::debug!(unit = %self.unit, lane = %lane, "Command {}", event.event_type);
                }
            }
            EventType::LaneHubLoaded | EventType::LaneHubUnloaded => {
                self.on_hub_edge(&lane, event.event_type == EventType::LaneHubLoaded, eventtime)?;
            }
            EventType::LaneToolLoaded | EventType::LaneToolUnloaded => {
                self.reconcile_on_edge(&lane)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// The lane an event is about, if it is one of ours
    fn event_lane(&self, payload: &EventPayload) -> Option<String> {
        let lane = payload.get_str("lane_name")?;
        let owner = payload
            .get_str("lane_unit")
            .or_else(|| payload.get_str("unit_name"))?;
        if owner != self.unit && owner != self.hardware.name() {
            return None;
        }
        self.state
            .lock()
            .lanes
            .contains_key(lane)
            .then(|| lane.to_string())
    }

    fn binding(&self, lane: &str) -> Option<LaneBinding> {
        self.state.lock().lanes.get(lane).cloned()
    }

    fn on_feed_edge(
        &self,
        lane: &str,
        present: bool,
        previous: Option<bool>,
        eventtime: f64,
    ) -> SyncResult<()> {
        let Some(binding) = self.binding(lane) else {
            return Ok(());
        };
        self.log_callback(lane, "prep", binding.handle.prep_callback(eventtime, present));
        self.log_callback(lane, "load", binding.handle.load_callback(eventtime, present));

        if present {
            if self.clear_runout(lane) {
                tracing::info!(unit = %self.unit, lane = %lane, "Lane reloaded, runout cleared");
            }
            return Ok(());
        }

        if previous == Some(true) && self.host.is_printing() {
            self.classify_runout(lane, eventtime)?;
        }
        Ok(())
    }

    fn on_hub_edge(&self, lane: &str, present: bool, eventtime: f64) -> SyncResult<()> {
        if let Some(hub) = self.binding(lane).and_then(|binding| binding.hub) {
            self.log_callback(lane, "hub", hub.switch_pin_callback(eventtime, present));
        }
        // Without a toolhead reading the hub decides whether a record stands
        self.reconcile_on_edge(lane)
    }

    /// Reconcile after a sensor edge, or queue it while a sync is feeding
    /// the other lanes
    fn reconcile_on_edge(&self, lane: &str) -> SyncResult<()> {
        let binding = self
            .binding(lane)
            .ok_or_else(|| SyncError::UnknownLane(lane.to_string()))?;
        {
            let mut state = self.state.lock();
            if let Some(pending) = state.pending.as_mut() {
                pending.extend(normalize_extruder_name(&binding.config.extruder));
                return Ok(());
            }
        }
        self.reconcile_extruder(&binding.config.extruder).map(|_| ())
    }

    fn log_callback(&self, lane: &str, callback: &str, result: anyhow::Result<()>) {
        if let Err(err) = result {
            tracing::error!(unit = %self.unit, lane = %lane, callback, error = %err, "Lane callback failed");
        }
    }

    fn pause(&self, message: &str) {
        tracing::warn!(unit = %self.unit, "Pausing printer: {}", message);
        if let Err(err) = self.host.pause(message) {
            tracing::error!(unit = %self.unit, error = %err, "Pause request failed");
        }
    }

    /// Reconcile the extruder a lane feeds
    pub fn reconcile_lane(&self, lane: &str) -> SyncResult<Reconciliation> {
        let binding = self
            .binding(lane)
            .ok_or_else(|| SyncError::UnknownLane(lane.to_string()))?;
        self.reconcile_extruder(&binding.config.extruder)
    }

    /// Decide and record which lane is loaded into `extruder`.
    ///
    /// Every lane registered for the extruder takes part, whichever unit
    /// owns it.
    pub fn reconcile_extruder(&self, extruder: &str) -> SyncResult<Reconciliation> {
        let Some(key) = normalize_extruder_name(extruder) else {
            return Ok(Reconciliation::Unchanged);
        };

        let recorded = self.context.loaded_lane(&key);
        let readings = self.readings(extruder);
        let persisted = match (&recorded, &self.persisted) {
            (None, Some(cache)) => cache.current().lane_loaded(extruder).map(str::to_string),
            _ => None,
        };

        match reconcile(recorded.as_deref(), &readings, persisted.as_deref()) {
            Ok(outcome) => {
                if !self.apply_reconciliation(&key, recorded.as_deref(), &outcome) {
                    tracing::debug!(unit = %self.unit, extruder = %key, "Loaded lane changed during reconciliation");
                }
                Ok(outcome)
            }
            Err(conflict) => {
                let err = SyncError::Conflict {
                    extruder: key,
                    lanes: conflict.lanes,
                };
                tracing::error!(unit = %self.unit, "{}", err);
                self.pause(&err.to_string());
                Err(err)
            }
        }
    }

    /// Sensor readings of every lane feeding `extruder`
    fn readings(&self, extruder: &str) -> Vec<LaneReading> {
        let mut lanes: Vec<(String, String)> = self
            .context
            .registry()
            .lanes_for_extruder(extruder)
            .iter()
            .map(|record| (record.unit_name.clone(), record.lane_name.clone()))
            .collect();
        {
            let state = self.state.lock();
            for binding in state.lanes.values() {
                let name = &binding.config.name;
                if same_extruder(&binding.config.extruder, extruder)
                    && !lanes.iter().any(|(_, lane)| lane == name)
                {
                    lanes.push((self.unit.clone(), name.clone()));
                }
            }
        }

        lanes
            .into_iter()
            .map(|(unit, lane)| {
                let snapshot = if unit == self.unit {
                    self.hardware.latest_lane_snapshot(&unit, &lane)
                } else {
                    self.context.lane_snapshot(&unit, &lane)
                };
                match snapshot {
                    Some(snapshot) => LaneReading {
                        lane,
                        feed: snapshot.lane_state,
                        hub: snapshot.hub_state,
                        tool: snapshot.tool_state,
                    },
                    None => LaneReading::new(lane),
                }
            })
            .collect()
    }

    /// Record an outcome and drive the lanes it touches. Returns false when
    /// the shared record moved away from `recorded` first.
    fn apply_reconciliation(
        &self,
        extruder: &str,
        recorded: Option<&str>,
        outcome: &Reconciliation,
    ) -> bool {
        match outcome {
            Reconciliation::Confirmed { .. } | Reconciliation::Unchanged => return true,
            Reconciliation::Ambiguous { lane } => {
                tracing::warn!(
                    unit = %self.unit,
                    lane = %lane,
                    extruder,
                    "Toolhead state unknown and hub occupied, keeping recorded lane"
                );
                return true;
            }
            Reconciliation::Corrected { from, to } => {
                if !self
                    .context
                    .swap_loaded_lane(extruder, recorded, Some(to.clone()))
                {
                    return false;
                }
                self.state.lock().runout.remove(to);
                tracing::info!(
                    unit = %self.unit,
                    extruder,
                    from = ?from,
                    to = %to,
                    "Toolhead sensor corrected loaded lane"
                );
                if let Some(from) = from {
                    self.release_lane(from);
                }
                self.engage_lane(to);
            }
            Reconciliation::Cleared { lane } => {
                if !self.context.swap_loaded_lane(extruder, Some(lane.as_str()), None) {
                    return false;
                }
                tracing::info!(unit = %self.unit, lane = %lane, extruder, "Lane no longer loaded");
                self.release_lane(lane);
            }
            Reconciliation::Restored { lane } => {
                if !self
                    .context
                    .swap_loaded_lane(extruder, None, Some(lane.clone()))
                {
                    return false;
                }
                tracing::info!(unit = %self.unit, lane = %lane, extruder, "Restored loaded lane from saved state");
                self.engage_lane(lane);
            }
        }

        if let Err(err) = self.host.save_state() {
            tracing::error!(unit = %self.unit, error = %err, "Failed to save state");
        }
        true
    }

    /// Handle of a lane, ours or another engine's
    fn lane_handle(&self, lane: &str) -> Option<Arc<dyn LaneHandle>> {
        match self.binding(lane) {
            Some(binding) => Some(binding.handle),
            None => self.context.lane_owner(lane).map(|owner| owner.handle),
        }
    }

    fn engage_lane(&self, lane: &str) {
        if let Some(handle) = self.lane_handle(lane) {
            self.log_callback(lane, "set_tool_loaded", handle.set_tool_loaded());
            self.log_callback(lane, "sync_to_extruder", handle.sync_to_extruder());
        }
    }

    fn release_lane(&self, lane: &str) {
        if let Some(handle) = self.lane_handle(lane) {
            self.log_callback(lane, "set_unloaded", handle.set_unloaded());
            self.log_callback(lane, "unsync_to_extruder", handle.unsync_to_extruder());
        }
    }

    /// Classify a feed-sensor runout on one of this unit's lanes
    pub fn classify_runout(&self, lane: &str, eventtime: f64) -> SyncResult<RunoutOutcome> {
        let binding = self
            .binding(lane)
            .ok_or_else(|| SyncError::UnknownLane(lane.to_string()))?;
        if !self.host.is_printing() {
            return Ok(RunoutOutcome::NotPrinting);
        }
        {
            let mut state = self.state.lock();
            if state.runout.contains(lane) || !state.dispatching.insert(lane.to_string()) {
                tracing::debug!(unit = %self.unit, lane = %lane, "Runout already in progress");
                return Ok(RunoutOutcome::AlreadyInProgress);
            }
        }

        let result = self.dispatch_runout(&binding);
        self.state.lock().dispatching.remove(lane);
        match &result {
            Ok(outcome) => self.publish_runout(lane, outcome.as_str(), outcome.target(), eventtime),
            Err(SyncError::Handoff { target, .. }) => {
                self.publish_runout(lane, "handoff_failed", Some(target.as_str()), eventtime)
            }
            Err(_) => {}
        }
        result
    }

    fn dispatch_runout(&self, binding: &LaneBinding) -> SyncResult<RunoutOutcome> {
        let lane = binding.name();
        let origin_extruder = normalize_extruder_name(&binding.config.extruder);

        let Some(target) = self.resolve_runout_target(binding) else {
            tracing::info!(
                unit = %self.unit,
                lane = %lane,
                extruder = ?origin_extruder,
                "No runout lane, using native runout handling"
            );
            if let Err(err) = self.host.native_runout(origin_extruder.as_deref(), lane) {
                tracing::error!(unit = %self.unit, lane = %lane, error = %err, "Native runout failed");
            }
            return Ok(RunoutOutcome::NativeRunout {
                extruder: origin_extruder,
            });
        };

        let target_extruder = self
            .lane_extruder(&target)
            .and_then(|extruder| normalize_extruder_name(&extruder));
        let (Some(origin_extruder), Some(target_extruder)) = (origin_extruder, target_extruder)
        else {
            let reason = format!(
                "Cannot resolve extruders for runout from {} to {}",
                lane, target
            );
            tracing::error!(unit = %self.unit, lane = %lane, target = %target, "{}", reason);
            self.pause(&reason);
            return Ok(RunoutOutcome::Paused { reason });
        };

        if origin_extruder == target_extruder {
            tracing::info!(
                unit = %self.unit,
                lane = %lane,
                target = %target,
                extruder = %origin_extruder,
                "Runout onto a lane of the same extruder"
            );
            // Held until the lane reloads
            self.state.lock().runout.insert(lane.to_string());
            return Ok(RunoutOutcome::SameExtruder { target });
        }

        tracing::info!(
            unit = %self.unit,
            origin = %lane,
            target = %target,
            from = %origin_extruder,
            to = %target_extruder,
            "Cross-extruder runout handoff"
        );
        match self.host.cross_extruder_handoff(lane, &target) {
            Ok(()) => Ok(RunoutOutcome::CrossExtruder { target }),
            Err(err) => {
                tracing::error!(
                    unit = %self.unit,
                    origin = %lane,
                    target = %target,
                    error = %err,
                    "Runout handoff failed"
                );
                Err(SyncError::Handoff {
                    origin: lane.to_string(),
                    target,
                    reason: format!("{:#}", err),
                })
            }
        }
    }

    /// Configured runout target, then the persisted one
    fn resolve_runout_target(&self, binding: &LaneBinding) -> Option<String> {
        let lane = binding.name();
        if let Some(token) = binding.config.runout_lane.as_deref() {
            match self.resolve_target_token(token) {
                Some(target) if target != lane => return Some(target),
                Some(_) => {
                    tracing::warn!(unit = %self.unit, lane = %lane, "Runout lane points at itself")
                }
                None => {
                    tracing::warn!(unit = %self.unit, lane = %lane, token, "Runout lane not found")
                }
            }
        }

        let persisted = self.persisted.as_ref()?.current();
        let token = persisted.runout_lane(&self.unit, lane)?;
        self.resolve_target_token(token)
            .filter(|target| target != lane)
    }

    /// Own lane name or group alias, then a registry token, then a lane name
    fn resolve_target_token(&self, token: &str) -> Option<String> {
        let token = token.trim();
        if token.is_empty() {
            return None;
        }
        {
            let state = self.state.lock();
            let alias = state.lanes.values().find(|binding| {
                binding.config.name.eq_ignore_ascii_case(token)
                    || binding
                        .config
                        .group
                        .as_deref()
                        .is_some_and(|group| group.eq_ignore_ascii_case(token))
            });
            if let Some(binding) = alias {
                return Some(binding.config.name.clone());
            }
        }

        let registry = self.context.registry();
        registry
            .resolve_lane_token(token)
            .or_else(|| registry.get_by_lane(token))
            .map(|record| record.lane_name.clone())
    }

    fn lane_extruder(&self, lane: &str) -> Option<String> {
        match self.binding(lane) {
            Some(binding) => Some(binding.config.extruder),
            None => self.context.registry().resolve_extruder(lane),
        }
    }

    fn publish_runout(&self, lane: &str, outcome: &str, target: Option<&str>, eventtime: f64) {
        let mut payload = payload! {
            "unit_name" => self.unit.as_str(),
            "lane_name" => lane,
            "outcome" => outcome,
            "eventtime" => eventtime,
            "hardware" => self.hardware.name(),
        };
        if let Some(target) = target {
            payload.insert("target", target);
        }
        self.context.bus().publish(EventType::RunoutClassified, payload);
    }

    /// A monitor reports a lane loaded into or unloaded from the toolhead.
    ///
    /// When loading, the lane previously recorded for the extruder is
    /// unloaded first so the toolhead never has two claims.
    pub fn handle_lane_tool_state(
        &self,
        lane: &str,
        loaded: bool,
        spool_index: Option<usize>,
        eventtime: f64,
    ) -> SyncResult<()> {
        let binding = self
            .binding(lane)
            .ok_or_else(|| SyncError::UnknownLane(lane.to_string()))?;
        let extruder = binding.config.extruder.clone();
        let recorded = self.context.loaded_lane(&extruder);

        if loaded {
            if let Some(previous) = recorded.as_deref().filter(|previous| *previous != lane) {
                self.observe_tool(previous, false, None, eventtime);
            }
            self.clear_runout(lane);
        }
        let spool_index = spool_index.unwrap_or(binding.config.spool_index);
        self.observe_tool(lane, loaded, Some(spool_index), eventtime);

        if !loaded && recorded.as_deref() != Some(lane) {
            self.release_lane(lane);
        }
        self.reconcile_extruder(&extruder).map(|_| ())
    }

    /// Record a toolhead reading on the service of whichever unit owns `lane`
    fn observe_tool(&self, lane: &str, tool: bool, spool_index: Option<usize>, eventtime: f64) {
        let (unit, hardware) = if self.binding(lane).is_some() {
            (self.unit.clone(), Arc::clone(&self.hardware))
        } else if let Some(owner) = self.context.lane_owner(lane) {
            (owner.unit, owner.hardware)
        } else {
            tracing::debug!(unit = %self.unit, lane = %lane, "No engine owns lane, toolhead reading dropped");
            return;
        };
        let feed = hardware
            .latest_lane_snapshot(&unit, lane)
            .and_then(|snapshot| snapshot.lane_state)
            .unwrap_or(tool);
        let mut observation = LaneObservation::new(unit.as_str(), lane, feed, eventtime)
            .with_tool(Some(tool))
            .without_spool_event();
        if let Some(spool_index) = spool_index {
            observation = observation.with_spool_index(spool_index);
        }
        hardware.update_lane_snapshot(observation);
    }

    /// Poll the controller once and feed every lane's sensors to the
    /// hardware service.
    ///
    /// Extruders are reconciled once all lanes are fed: those that saw an
    /// edge, or every extruder the unit feeds on the first sync after lanes
    /// were added. Returns the status used, or `None` without a controller.
    pub fn sync_once(&self, eventtime: f64) -> Option<ControllerStatus> {
        let status = self.hardware.poll_status()?;
        if status.degraded {
            tracing::debug!(unit = %self.unit, "Syncing from degraded status");
        }

        let lanes: Vec<LaneBinding> = {
            let mut state = self.state.lock();
            state.pending = Some(BTreeSet::new());
            state.lanes.values().cloned().collect()
        };
        self.track_encoder(&status, &lanes);

        for binding in &lanes {
            let spool_index = binding.config.spool_index;
            let Some(feed) = status.feed_sensor(spool_index) else {
                continue;
            };
            let observation =
                LaneObservation::new(self.unit.as_str(), binding.name(), feed, eventtime)
                    .with_hub(status.hub_sensor(spool_index))
                    .with_tool(binding.handle.tool_filament())
                    .with_spool_index(spool_index);
            self.hardware.update_lane_snapshot(observation);
        }

        let extruders = {
            let mut state = self.state.lock();
            let pending = state.pending.take().unwrap_or_default();
            if std::mem::replace(&mut state.reconciled, true) {
                pending
            } else {
                lanes
                    .iter()
                    .filter_map(|binding| normalize_extruder_name(&binding.config.extruder))
                    .collect()
            }
        };
        for extruder in extruders {
            match self.reconcile_extruder(&extruder) {
                Ok(outcome) => {
                    tracing::trace!(unit = %self.unit, extruder = %extruder, "Reconciled after sync: {:?}", outcome)
                }
                Err(err) => {
                    tracing::warn!(unit = %self.unit, extruder = %extruder, error = %err, "Reconciliation after sync failed")
                }
            }
        }
        Some(status)
    }

    fn track_encoder(&self, status: &ControllerStatus, lanes: &[LaneBinding]) {
        let current = status.current_spool.and_then(|spool_index| {
            lanes
                .iter()
                .find(|binding| binding.config.spool_index == spool_index)
                .map(|binding| binding.config.name.clone())
        });

        let mut state = self.state.lock();
        let moved = match (state.last_encoder, status.encoder_clicks) {
            (Some(previous), Some(clicks)) => clicks != previous,
            _ => false,
        };
        if status.encoder_clicks.is_some() {
            state.last_encoder = status.encoder_clicks;
        }
        state.feed_activity.clear();
        if let (true, Some(lane)) = (moved, current) {
            state.feed_activity.insert(lane);
        }
    }

    /// Periodic sync until `shutdown` fires or its sender is dropped
    pub async fn run(self: Arc<Self>, mut shutdown: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.sync_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(unit = %self.unit, interval_ms = self.sync_interval.as_millis() as u64, "Sync loop running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let eventtime = self.context.clock().monotonic();
                    self.sync_once(eventtime);
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::info!(unit = %self.unit, "Sync loop stopped");
    }

    /// Clear a lane's runout flag; returns whether it was set
    pub fn clear_runout(&self, lane: &str) -> bool {
        self.state.lock().runout.remove(lane)
    }

    pub fn runout_in_progress(&self, lane: &str) -> bool {
        self.state.lock().runout.contains(lane)
    }

    pub fn feed_activity(&self, lane: &str) -> bool {
        self.state.lock().feed_activity.contains(lane)
    }

    /// Lane recorded as loaded into `extruder`, by any unit of the context
    pub fn loaded_lane(&self, extruder: &str) -> Option<String> {
        self.context.loaded_lane(extruder)
    }

    pub fn lane_status(&self, lane: &str) -> Option<LaneStatus> {
        let (extruder, runout_in_progress, feed_activity) = {
            let state = self.state.lock();
            let binding = state.lanes.get(lane)?;
            (
                binding.config.extruder.clone(),
                state.runout.contains(lane),
                state.feed_activity.contains(lane),
            )
        };
        let loaded = self.context.loaded_lane(&extruder).as_deref() == Some(lane);
        let snapshot = self.hardware.latest_lane_snapshot(&self.unit, lane);
        let (feed, hub, tool) = snapshot
            .map(|s| (s.lane_state, s.hub_state, s.tool_state))
            .unwrap_or_default();

        Some(LaneStatus {
            lane: lane.to_string(),
            extruder,
            state: LaneState::from_sensors(feed, hub, tool, loaded),
            runout_in_progress,
            feed_activity,
        })
    }

    pub fn lane_statuses(&self) -> Vec<LaneStatus> {
        self.lane_names()
            .iter()
            .filter_map(|lane| self.lane_status(lane))
            .collect()
    }

    /// This unit's lane in a bay of its hardware
    fn lane_for_spool(&self, spool_index: usize) -> Option<String> {
        let own = self
            .state
            .lock()
            .lanes
            .values()
            .find(|binding| binding.config.spool_index == spool_index)
            .map(|binding| binding.config.name.clone());
        own.or_else(|| {
            self.hardware
                .resolve_lane_for_spool(&self.unit, spool_index)
                .filter(|lane| self.state.lock().lanes.contains_key(lane))
        })
    }
}

impl RunoutConsumer for SyncEngine {
    fn consumer_name(&self) -> &str {
        &self.unit
    }

    fn handle_runout(&self, spool_index: Option<usize>) -> anyhow::Result<()> {
        let spool_index = spool_index.or_else(|| {
            self.hardware
                .latest_status()
                .and_then(|status| status.current_spool)
        });
        let lane = spool_index
            .and_then(|spool_index| self.lane_for_spool(spool_index))
            .ok_or_else(|| {
                anyhow::anyhow!("No lane of {} on spool {:?}", self.unit, spool_index)
            })?;

        let outcome = self.classify_runout(&lane, self.context.clock().monotonic())?;
        tracing::debug!(unit = %self.unit, lane = %lane, "Monitor runout classified: {}", outcome);
        Ok(())
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SyncEngine")
            .field("unit", &self.unit)
            .field("hardware", &self.hardware.name())
            .field("lanes", &state.lanes.len())
            .field("started", &!state.subscriptions.is_empty())
            .finish()
    }
}
