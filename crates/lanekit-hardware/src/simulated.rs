//! In-memory feeder controller.
//!
//! Used by the replay tool and by tests: sensor arrays are set by hand and
//! every accepted command is recorded.

use anyhow::bail;
use lanekit_core::HardwareError;
use parking_lot::Mutex;

use crate::controller::{ControllerStatus, FeederController};

/// Command accepted by a [`SimulatedController`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentCommand {
    LoadSpool(usize),
    UnloadSpool,
    Follower { enable: bool, direction: i32 },
    LedError { spool_index: usize, value: u8 },
}

#[derive(Debug, Default)]
struct SimState {
    feed: Vec<bool>,
    hub: Vec<bool>,
    current_spool: Option<usize>,
    fps_value: f64,
    encoder_clicks: Option<i64>,
    fail_status: bool,
    fail_commands: bool,
    hub_follows_load: bool,
    sent: Vec<SentCommand>,
}

/// Feeder controller with scripted sensors
#[derive(Debug)]
pub struct SimulatedController {
    name: String,
    bays: usize,
    state: Mutex<SimState>,
}

impl SimulatedController {
    pub fn new(name: impl Into<String>, bays: usize) -> Self {
        Self {
            name: name.into(),
            bays,
            state: Mutex::new(SimState {
                feed: vec![false; bays],
                hub: vec![false; bays],
                ..Default::default()
            }),
        }
    }

    pub fn bays(&self) -> usize {
        self.bays
    }

    pub fn set_feed(&self, bay: usize, present: bool) {
        let mut state = self.state.lock();
        set_bay(&mut state.feed, bay, present);
    }

    pub fn set_hub(&self, bay: usize, present: bool) {
        let mut state = self.state.lock();
        set_bay(&mut state.hub, bay, present);
    }

    /// Replace both sensor arrays
    pub fn set_sensors(&self, feed: Vec<bool>, hub: Vec<bool>) {
        let mut state = self.state.lock();
        state.feed = feed;
        state.hub = hub;
    }

    pub fn set_current_spool(&self, spool_index: Option<usize>) {
        self.state.lock().current_spool = spool_index;
    }

    pub fn set_fps_value(&self, value: f64) {
        self.state.lock().fps_value = value;
    }

    pub fn set_encoder_clicks(&self, clicks: Option<i64>) {
        self.state.lock().encoder_clicks = clicks;
    }

    /// Make `get_status` fail until cleared
    pub fn set_fail_status(&self, fail: bool) {
        self.state.lock().fail_status = fail;
    }

    /// Make every command fail until cleared
    pub fn set_fail_commands(&self, fail: bool) {
        self.state.lock().fail_commands = fail;
    }

    /// When set, a load raises the bay's hub sensor and an unload clears it
    pub fn set_hub_follows_load(&self, follow: bool) {
        self.state.lock().hub_follows_load = follow;
    }

    pub fn sent_commands(&self) -> Vec<SentCommand> {
        self.state.lock().sent.clone()
    }

    fn accept(&self, command: SentCommand) -> anyhow::Result<()> {
        let mut state = self.state.lock();
        if state.fail_commands {
            bail!("controller {} rejected {:?}", self.name, command);
        }
        match &command {
            SentCommand::LoadSpool(index) => {
                state.current_spool = Some(*index);
                if state.hub_follows_load {
                    set_bay(&mut state.hub, *index, true);
                }
            }
            SentCommand::UnloadSpool => {
                if let Some(index) = state.current_spool.take() {
                    if state.hub_follows_load {
                        set_bay(&mut state.hub, index, false);
                    }
                }
            }
            SentCommand::Follower { .. } | SentCommand::LedError { .. } => {}
        }
        state.sent.push(command);
        Ok(())
    }

    fn check_bay(&self, spool_index: usize) -> anyhow::Result<()> {
        if spool_index >= self.bays {
            return Err(HardwareError::InvalidSpoolIndex { index: spool_index }.into());
        }
        Ok(())
    }
}

fn set_bay(values: &mut Vec<bool>, bay: usize, present: bool) {
    if values.len() <= bay {
        values.resize(bay + 1, false);
    }
    values[bay] = present;
}

impl FeederController for SimulatedController {
    fn name(&self) -> &str {
        &self.name
    }

    fn get_status(&self, _eventtime: f64) -> anyhow::Result<ControllerStatus> {
        let state = self.state.lock();
        if state.fail_status {
            bail!("status read from {} timed out", self.name);
        }
        Ok(ControllerStatus {
            current_spool: state.current_spool,
            feed_sensors: state.feed.clone(),
            hub_sensors: state.hub.clone(),
            fps_value: state.fps_value,
            encoder_clicks: state.encoder_clicks,
            degraded: false,
        })
    }

    fn current_spool(&self) -> Option<usize> {
        self.state.lock().current_spool
    }

    fn feed_sensors(&self) -> Vec<bool> {
        self.state.lock().feed.clone()
    }

    fn hub_sensors(&self) -> Vec<bool> {
        self.state.lock().hub.clone()
    }

    fn fps_value(&self) -> f64 {
        self.state.lock().fps_value
    }

    fn encoder_clicks(&self) -> Option<i64> {
        self.state.lock().encoder_clicks
    }

    fn load_spool(&self, spool_index: usize) -> anyhow::Result<()> {
        self.check_bay(spool_index)?;
        self.accept(SentCommand::LoadSpool(spool_index))
    }

    fn unload_spool(&self) -> anyhow::Result<()> {
        self.accept(SentCommand::UnloadSpool)
    }

    fn set_follower(&self, enable: bool, direction: i32) -> anyhow::Result<()> {
        self.accept(SentCommand::Follower { enable, direction })
    }

    fn set_led_error(&self, spool_index: usize, value: u8) -> anyhow::Result<()> {
        self.check_bay(spool_index)?;
        self.accept(SentCommand::LedError { spool_index, value })
    }
}
