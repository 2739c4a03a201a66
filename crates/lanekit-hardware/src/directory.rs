//! One hardware service per unit name within a controller context.

use lanekit_core::{normalize_unit_name, Clock, EventBus};
use lanekit_lanedb::LaneRegistry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::controller::ControllerLookup;
use crate::service::HardwareService;

/// Unit name used when a blank name is requested
const DEFAULT_UNIT: &str = "default";

/// Factory handing out the same [`HardwareService`] for the same unit name
pub struct HardwareDirectory {
    bus: Arc<EventBus>,
    registry: Arc<LaneRegistry>,
    clock: Arc<dyn Clock>,
    lookup: Option<Arc<dyn ControllerLookup>>,
    services: Mutex<HashMap<String, Arc<HardwareService>>>,
}

impl HardwareDirectory {
    pub fn new(bus: Arc<EventBus>, registry: Arc<LaneRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            bus,
            registry,
            clock,
            lookup: None,
            services: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_lookup(mut self, lookup: Arc<dyn ControllerLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Service for a unit, created on first request.
    ///
    /// `"OAMS oams1"` and `"oams1"` name the same unit.
    pub fn service(&self, unit_name: &str) -> Arc<HardwareService> {
        let key = normalize_unit_name(unit_name, DEFAULT_UNIT);
        let mut services = self.services.lock();
        services
            .entry(key.clone())
            .or_insert_with(|| {
                tracing::debug!(unit = %key, "Creating hardware service");
                let service = HardwareService::new(
                    key.clone(),
                    Arc::clone(&self.bus),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.clock),
                );
                Arc::new(match &self.lookup {
                    Some(lookup) => service.with_lookup(Arc::clone(lookup)),
                    None => service,
                })
            })
            .clone()
    }

    /// Existing service for a unit, without creating one
    pub fn get(&self, unit_name: &str) -> Option<Arc<HardwareService>> {
        let key = normalize_unit_name(unit_name, DEFAULT_UNIT);
        self.services.lock().get(&key).cloned()
    }

    /// Every service created so far, ordered by unit name
    pub fn services(&self) -> Vec<Arc<HardwareService>> {
        let mut services: Vec<_> = self.services.lock().values().cloned().collect();
        services.sort_by(|a, b| a.name().cmp(b.name()));
        services
    }

    pub fn unit_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.services.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for HardwareDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareDirectory")
            .field("units", &self.unit_names())
            .finish()
    }
}
