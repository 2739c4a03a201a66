//! Replay recorded sensor traces through a simulated unit.
//!
//! A trace is a JSON-lines file, one frame per line:
//!
//! ```json
//! {"t": 12.5, "feed": [true, false, false, false], "hub": [true, false, false, false], "printing": true}
//! ```
//!
//! Every field is optional. Sensor arrays replace the controller's arrays
//! only when present; `unit` picks the unit a frame applies to (the first
//! configured unit otherwise); `tool` maps lane names to toolhead sensor
//! readings.

use anyhow::{bail, Context, Result};
use lanekit_core::{EventRecord, ManualClock};
use lanekit_hardware::SimulatedController;
use lanekit_settings::{Config, LaneSettings, UnitSettings};
use lanekit_sync::{
    ControllerContext, LaneBinding, LaneConfig, LaneHandle, PrinterHost, SyncEngine,
    SyncEngineConfig,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// One recorded controller poll
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Frame {
    pub t: f64,
    pub unit: Option<String>,
    pub feed: Option<Vec<bool>>,
    pub hub: Option<Vec<bool>>,
    pub printing: Option<bool>,
    pub current_spool: Option<usize>,
    pub encoder: Option<i64>,
    pub tool: HashMap<String, bool>,
}

/// Read a JSON-lines trace; blank lines and `#` comments are skipped
pub fn read_frames(path: &Path) -> Result<Vec<Frame>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open trace {}", path.display()))?;
    let mut frames = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let frame: Frame = serde_json::from_str(line)
            .with_context(|| format!("{}:{}: invalid frame", path.display(), number + 1))?;
        frames.push(frame);
    }
    Ok(frames)
}

/// Counts of host actions taken during a replay
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub frames: usize,
    pub events: usize,
    pub pauses: usize,
    pub handoffs: usize,
    pub native_runouts: usize,
}

/// Lane handle that only logs
struct ReplayLane {
    name: String,
    tool: Mutex<Option<bool>>,
}

impl ReplayLane {
    fn log(&self, action: &str) -> anyhow::Result<()> {
        tracing::debug!(lane = %self.name, "{}", action);
        Ok(())
    }
}

impl LaneHandle for ReplayLane {
    fn set_tool_loaded(&self) -> anyhow::Result<()> {
        self.log("set_tool_loaded")
    }

    fn set_unloaded(&self) -> anyhow::Result<()> {
        self.log("set_unloaded")
    }

    fn sync_to_extruder(&self) -> anyhow::Result<()> {
        self.log("sync_to_extruder")
    }

    fn unsync_to_extruder(&self) -> anyhow::Result<()> {
        self.log("unsync_to_extruder")
    }

    fn prep_callback(&self, eventtime: f64, present: bool) -> anyhow::Result<()> {
        tracing::debug!(lane = %self.name, eventtime, present, "prep");
        Ok(())
    }

    fn load_callback(&self, eventtime: f64, present: bool) -> anyhow::Result<()> {
        tracing::debug!(lane = %self.name, eventtime, present, "load");
        Ok(())
    }

    fn tool_filament(&self) -> Option<bool> {
        *self.tool.lock()
    }
}

/// Printer host that counts what it was asked to do
#[derive(Default)]
struct ReplayHost {
    printing: AtomicBool,
    pauses: AtomicUsize,
    handoffs: AtomicUsize,
    native_runouts: AtomicUsize,
}

impl PrinterHost for ReplayHost {
    fn is_printing(&self) -> bool {
        self.printing.load(Ordering::SeqCst)
    }

    fn pause(&self, message: &str) -> anyhow::Result<()> {
        tracing::warn!("PAUSE: {}", message);
        self.pauses.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cross_extruder_handoff(&self, origin_lane: &str, target_lane: &str) -> anyhow::Result<()> {
        tracing::info!(origin = %origin_lane, target = %target_lane, "HANDOFF");
        self.handoffs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn native_runout(&self, extruder: Option<&str>, lane: &str) -> anyhow::Result<()> {
        tracing::info!(extruder = ?extruder, lane = %lane, "NATIVE RUNOUT");
        self.native_runouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ReplayUnit {
    name: String,
    controller: Arc<SimulatedController>,
    engine: Arc<SyncEngine>,
    lanes: HashMap<String, Arc<ReplayLane>>,
}

/// Units from `config`, or one default unit with a lane per bay
fn replay_units(config: &Config) -> Vec<UnitSettings> {
    if !config.units.is_empty() {
        return config.units.clone();
    }
    let mut unit = UnitSettings::default();
    unit.lanes = (0..unit.bays)
        .map(|bay| LaneSettings::new(format!("lane{}", bay + 1), bay))
        .collect();
    vec![unit]
}

/// Simulated units driven frame by frame
pub struct Replay {
    context: Arc<ControllerContext>,
    clock: Arc<ManualClock>,
    host: Arc<ReplayHost>,
    units: Vec<ReplayUnit>,
    frames: AtomicUsize,
}

impl Replay {
    pub fn new(config: &Config) -> Result<Self> {
        let clock = Arc::new(ManualClock::new(0.0));
        let context = ControllerContext::builder()
            .bus_config(config.bus.to_bus_config())
            .clock(clock.clone())
            .build();
        let host = Arc::new(ReplayHost::default());

        let mut units = Vec::new();
        for settings in replay_units(config) {
            let controller = Arc::new(SimulatedController::new(
                settings.hardware.clone(),
                settings.bays,
            ));
            context
                .hardware_service(&settings.hardware)
                .attach_controller(controller.clone());

            let engine = SyncEngine::new(
                context.clone(),
                SyncEngineConfig::from_settings(&settings, config.persistence.var_file.clone()),
                host.clone(),
            );
            let mut lanes = HashMap::new();
            for lane in &settings.lanes {
                let handle = Arc::new(ReplayLane {
                    name: lane.name.clone(),
                    tool: Mutex::new(None),
                });
                engine.add_lane(LaneBinding::new(
                    LaneConfig::from_settings(&settings, lane),
                    handle.clone(),
                ))?;
                lanes.insert(lane.name.clone(), handle);
            }
            engine.start();
            tracing::info!(unit = %settings.name, lanes = lanes.len(), "Replay unit ready");

            units.push(ReplayUnit {
                name: settings.name.clone(),
                controller,
                engine,
                lanes,
            });
        }

        Ok(Self {
            context,
            clock,
            host,
            units,
            frames: AtomicUsize::new(0),
        })
    }

    pub fn context(&self) -> &Arc<ControllerContext> {
        &self.context
    }

    /// Records published so far, oldest first, within the history bound
    pub fn history(&self) -> Vec<EventRecord> {
        self.context.bus().history(None)
    }

    /// Apply one frame and run a sync pass for its unit
    pub fn apply(&self, frame: &Frame) -> Result<()> {
        let unit = match &frame.unit {
            Some(name) => self
                .units
                .iter()
                .find(|unit| &unit.name == name)
                .with_context(|| format!("frame at t={} names unknown unit {}", frame.t, name))?,
            None => match self.units.first() {
                Some(unit) => unit,
                None => bail!("no units to replay into"),
            },
        };

        self.clock.set(frame.t);
        if let Some(printing) = frame.printing {
            self.host.printing.store(printing, Ordering::SeqCst);
        }
        match (&frame.feed, &frame.hub) {
            (Some(feed), Some(hub)) => unit.controller.set_sensors(feed.clone(), hub.clone()),
            (Some(feed), None) => {
                for (bay, present) in feed.iter().enumerate() {
                    unit.controller.set_feed(bay, *present);
                }
            }
            (None, Some(hub)) => {
                for (bay, present) in hub.iter().enumerate() {
                    unit.controller.set_hub(bay, *present);
                }
            }
            (None, None) => {}
        }
        if frame.current_spool.is_some() {
            unit.controller.set_current_spool(frame.current_spool);
        }
        if frame.encoder.is_some() {
            unit.controller.set_encoder_clicks(frame.encoder);
        }
        for (lane, tool) in &frame.tool {
            match unit.lanes.get(lane) {
                Some(handle) => *handle.tool.lock() = Some(*tool),
                None => tracing::warn!(lane = %lane, "Tool reading for unknown lane ignored"),
            }
        }

        unit.engine.sync_once(frame.t);
        self.frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn summary(&self) -> ReplaySummary {
        ReplaySummary {
            frames: self.frames.load(Ordering::SeqCst),
            events: self.history().len(),
            pauses: self.host.pauses.load(Ordering::SeqCst),
            handoffs: self.host.handoffs.load(Ordering::SeqCst),
            native_runouts: self.host.native_runouts.load(Ordering::SeqCst),
        }
    }
}

impl Drop for Replay {
    fn drop(&mut self) {
        for unit in &self.units {
            unit.engine.stop();
        }
    }
}

/// Print records from `receiver` as JSON lines until the bus goes away
pub async fn stream_records(mut receiver: broadcast::Receiver<EventRecord>) -> Result<()> {
    loop {
        match receiver.recv().await {
            Ok(record) => println!("{}", serde_json::to_string(&record)?),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Output fell behind, records dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}
