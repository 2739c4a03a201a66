//! Feeder controller abstraction.
//!
//! A feeder controller reports per-bay feed and hub sensor arrays and
//! accepts load, unload, follower and LED commands. The hardware service
//! only ever talks to it through [`FeederController`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Status of a feeder controller at one poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatus {
    /// Bay currently driven into the hub path, if any
    pub current_spool: Option<usize>,
    /// Feed sensor per bay
    pub feed_sensors: Vec<bool>,
    /// Hub sensor per bay
    pub hub_sensors: Vec<bool>,
    /// Filament pressure sensor reading
    pub fps_value: f64,
    pub encoder_clicks: Option<i64>,
    /// Assembled from cached fields after a failed status read
    pub degraded: bool,
}

impl ControllerStatus {
    pub fn feed_sensor(&self, spool_index: usize) -> Option<bool> {
        self.feed_sensors.get(spool_index).copied()
    }

    pub fn hub_sensor(&self, spool_index: usize) -> Option<bool> {
        self.hub_sensors.get(spool_index).copied()
    }

    /// Number of bays reported by either sensor array
    pub fn bay_count(&self) -> usize {
        self.feed_sensors.len().max(self.hub_sensors.len())
    }
}

/// Physical feeder controller
///
/// Implementations are synchronous; commands return once the controller
/// has accepted them, not when the motion completes.
pub trait FeederController: Send + Sync {
    /// Get the controller name
    fn name(&self) -> &str;

    /// Read a full status from the device
    fn get_status(&self, eventtime: f64) -> anyhow::Result<ControllerStatus>;

    /// Last known bay in the hub path
    fn current_spool(&self) -> Option<usize>;

    /// Last known feed sensor array
    fn feed_sensors(&self) -> Vec<bool>;

    /// Last known hub sensor array
    fn hub_sensors(&self) -> Vec<bool>;

    fn fps_value(&self) -> f64 {
        0.0
    }

    fn encoder_clicks(&self) -> Option<i64> {
        None
    }

    fn load_spool(&self, spool_index: usize) -> anyhow::Result<()>;

    fn unload_spool(&self) -> anyhow::Result<()>;

    /// Enable or disable the follower motor; `direction` is 1 forward, 0 reverse
    fn set_follower(&self, enable: bool, direction: i32) -> anyhow::Result<()>;

    fn set_led_error(&self, spool_index: usize, value: u8) -> anyhow::Result<()>;

    /// Status assembled from the cached fields, used when a read fails
    fn best_known_status(&self) -> ControllerStatus {
        ControllerStatus {
            current_spool: self.current_spool(),
            feed_sensors: self.feed_sensors(),
            hub_sensors: self.hub_sensors(),
            fps_value: self.fps_value(),
            encoder_clicks: self.encoder_clicks(),
            degraded: true,
        }
    }
}

/// Looks up controller objects by hardware unit name
pub trait ControllerLookup: Send + Sync {
    fn lookup_controller(&self, name: &str) -> Option<Arc<dyn FeederController>>;
}

/// In-memory controller table
#[derive(Default)]
pub struct StaticControllerLookup {
    controllers: RwLock<HashMap<String, Arc<dyn FeederController>>>,
}

impl StaticControllerLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, controller: Arc<dyn FeederController>) {
        self.controllers.write().insert(name.into(), controller);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn FeederController>> {
        self.controllers.write().remove(name)
    }
}

impl ControllerLookup for StaticControllerLookup {
    fn lookup_controller(&self, name: &str) -> Option<Arc<dyn FeederController>> {
        self.controllers.read().get(name).cloned()
    }
}
