//! Recording collaborators shared by the sync engine tests

#![allow(dead_code)]

use lanekit_core::ManualClock;
use lanekit_hardware::{LaneObservation, SimulatedController};
use lanekit_sync::{
    ControllerContext, HubHandle, LaneBinding, LaneConfig, LaneHandle, PrinterHost, SyncEngine,
    SyncEngineConfig,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const UNIT: &str = "AMS_1";
pub const HARDWARE: &str = "oams1";

#[derive(Default)]
pub struct RecordingLane {
    pub calls: Mutex<Vec<String>>,
    pub tool: Mutex<Option<bool>>,
}

impl RecordingLane {
    fn record(&self, call: impl Into<String>) -> anyhow::Result<()> {
        self.calls.lock().unwrap().push(call.into());
        Ok(())
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_tool(&self, tool: Option<bool>) {
        *self.tool.lock().unwrap() = tool;
    }
}

impl LaneHandle for RecordingLane {
    fn set_tool_loaded(&self) -> anyhow::Result<()> {
        self.record("set_tool_loaded")
    }

    fn set_unloaded(&self) -> anyhow::Result<()> {
        self.record("set_unloaded")
    }

    fn sync_to_extruder(&self) -> anyhow::Result<()> {
        self.record("sync_to_extruder")
    }

    fn unsync_to_extruder(&self) -> anyhow::Result<()> {
        self.record("unsync_to_extruder")
    }

    fn prep_callback(&self, _eventtime: f64, present: bool) -> anyhow::Result<()> {
        self.record(format!("prep:{}", present))
    }

    fn load_callback(&self, _eventtime: f64, present: bool) -> anyhow::Result<()> {
        self.record(format!("load:{}", present))
    }

    fn tool_filament(&self) -> Option<bool> {
        *self.tool.lock().unwrap()
    }
}

#[derive(Default)]
pub struct RecordingHub {
    pub switches: Mutex<Vec<bool>>,
}

impl HubHandle for RecordingHub {
    fn name(&self) -> &str {
        "Cooper"
    }

    fn switch_pin_callback(&self, _eventtime: f64, present: bool) -> anyhow::Result<()> {
        self.switches.lock().unwrap().push(present);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingHost {
    pub printing: AtomicBool,
    pub fail_handoff: AtomicBool,
    pub pauses: Mutex<Vec<String>>,
    pub handoffs: Mutex<Vec<(String, String)>>,
    pub native: Mutex<Vec<(Option<String>, String)>>,
    pub saves: AtomicUsize,
}

impl RecordingHost {
    pub fn printing() -> Arc<Self> {
        let host = Self::default();
        host.printing.store(true, Ordering::SeqCst);
        Arc::new(host)
    }

    pub fn pauses(&self) -> Vec<String> {
        self.pauses.lock().unwrap().clone()
    }

    pub fn handoffs(&self) -> Vec<(String, String)> {
        self.handoffs.lock().unwrap().clone()
    }

    pub fn native(&self) -> Vec<(Option<String>, String)> {
        self.native.lock().unwrap().clone()
    }
}

impl PrinterHost for RecordingHost {
    fn is_printing(&self) -> bool {
        self.printing.load(Ordering::SeqCst)
    }

    fn pause(&self, message: &str) -> anyhow::Result<()> {
        self.pauses.lock().unwrap().push(message.to_string());
        Ok(())
    }

    fn cross_extruder_handoff(&self, origin_lane: &str, target_lane: &str) -> anyhow::Result<()> {
        self.handoffs
            .lock()
            .unwrap()
            .push((origin_lane.to_string(), target_lane.to_string()));
        if self.fail_handoff.load(Ordering::SeqCst) {
            anyhow::bail!("toolchanger busy");
        }
        Ok(())
    }

    fn native_runout(&self, extruder: Option<&str>, lane: &str) -> anyhow::Result<()> {
        self.native
            .lock()
            .unwrap()
            .push((extruder.map(str::to_string), lane.to_string()));
        Ok(())
    }

    fn save_state(&self) -> anyhow::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct Fixture {
    pub context: Arc<ControllerContext>,
    pub controller: Arc<SimulatedController>,
    pub host: Arc<RecordingHost>,
    pub engine: Arc<SyncEngine>,
    pub lanes: HashMap<String, Arc<RecordingLane>>,
}

impl Fixture {
    pub fn lane(&self, name: &str) -> &RecordingLane {
        &self.lanes[name]
    }

    /// Feed sensor observation for one lane
    pub fn feed(&self, lane: &str, present: bool, eventtime: f64) {
        self.engine
            .hardware()
            .update_lane_snapshot(LaneObservation::new(UNIT, lane, present, eventtime));
    }

    pub fn observe(&self, observation: LaneObservation) {
        self.engine.hardware().update_lane_snapshot(observation);
    }

    /// Start a second engine for another unit on the same context
    pub fn add_unit(&self, unit: &str, hardware: &str, lanes: Vec<LaneConfig>) -> Unit {
        let controller = Arc::new(SimulatedController::new(hardware, 4));
        self.context
            .hardware_service(hardware)
            .attach_controller(controller.clone());
        let engine = SyncEngine::new(
            self.context.clone(),
            SyncEngineConfig::new(unit, hardware),
            self.host.clone(),
        );
        let handles = bind_lanes(&engine, lanes);
        engine.start();
        Unit {
            name: unit.to_string(),
            controller,
            engine,
            lanes: handles,
        }
    }
}

pub struct Unit {
    pub name: String,
    pub controller: Arc<SimulatedController>,
    pub engine: Arc<SyncEngine>,
    pub lanes: HashMap<String, Arc<RecordingLane>>,
}

impl Unit {
    pub fn lane(&self, name: &str) -> &RecordingLane {
        &self.lanes[name]
    }

    pub fn observe(&self, observation: LaneObservation) {
        self.engine.hardware().update_lane_snapshot(observation);
    }
}

fn bind_lanes(engine: &SyncEngine, lanes: Vec<LaneConfig>) -> HashMap<String, Arc<RecordingLane>> {
    let mut handles = HashMap::new();
    for lane in lanes {
        let handle = Arc::new(RecordingLane::default());
        handles.insert(lane.name.clone(), handle.clone());
        engine.add_lane(LaneBinding::new(lane, handle)).unwrap();
    }
    handles
}

pub fn fixture_with(
    lanes: Vec<LaneConfig>,
    host: Arc<RecordingHost>,
    config: SyncEngineConfig,
) -> Fixture {
    let context = ControllerContext::builder()
        .clock(Arc::new(ManualClock::new(100.0)))
        .build();
    let controller = Arc::new(SimulatedController::new(HARDWARE, 4));
    context
        .hardware_service(HARDWARE)
        .attach_controller(controller.clone());

    let engine = SyncEngine::new(context.clone(), config, host.clone());
    let handles = bind_lanes(&engine, lanes);
    engine.start();

    Fixture {
        context,
        controller,
        host,
        engine,
        lanes: handles,
    }
}

pub fn fixture(lanes: Vec<LaneConfig>, host: Arc<RecordingHost>) -> Fixture {
    fixture_with(lanes, host, SyncEngineConfig::new(UNIT, HARDWARE))
}
