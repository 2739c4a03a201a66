//! Runout fan-out between monitors and lane owners.
//!
//! Runout monitors watch a hardware unit for a spool running dry; lane
//! owners (consumers) decide what to do about it. Both register against
//! the hardware unit name. The coordinator keeps weak references so a
//! registration never keeps a consumer alive.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Receives runout notifications for a hardware unit
pub trait RunoutConsumer: Send + Sync {
    fn consumer_name(&self) -> &str;

    /// Called when a monitor reports a runout on `spool_index`
    fn handle_runout(&self, spool_index: Option<usize>) -> anyhow::Result<()>;
}

/// Watches a hardware unit for runouts
pub trait RunoutMonitor: Send + Sync {
    fn monitor_name(&self) -> &str;
}

#[derive(Default)]
struct Registrations {
    consumers: HashMap<String, Vec<Weak<dyn RunoutConsumer>>>,
    monitors: HashMap<String, Vec<Weak<dyn RunoutMonitor>>>,
}

fn register<T: ?Sized>(entries: &mut Vec<Weak<T>>, item: &Arc<T>) -> bool {
    entries.retain(|entry| entry.strong_count() > 0);
    let candidate = Arc::downgrade(item);
    if entries.iter().any(|entry| Weak::ptr_eq(entry, &candidate)) {
        return false;
    }
    entries.push(candidate);
    true
}

fn live<T: ?Sized>(entries: Option<&Vec<Weak<T>>>) -> Vec<Arc<T>> {
    entries
        .map(|entries| entries.iter().filter_map(Weak::upgrade).collect())
        .unwrap_or_default()
}

/// Directory of runout consumers and monitors, keyed by hardware unit
#[derive(Default)]
pub struct RunoutCoordinator {
    registrations: Mutex<Registrations>,
}

impl RunoutCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer; returns false if it was already registered
    pub fn register_consumer(&self, unit_key: &str, consumer: &Arc<dyn RunoutConsumer>) -> bool {
        let mut registrations = self.registrations.lock();
        let added = register(
            registrations.consumers.entry(unit_key.to_string()).or_default(),
            consumer,
        );
        if added {
            tracing::debug!(unit = %unit_key, consumer = %consumer.consumer_name(), "Runout consumer registered");
        }
        added
    }

    /// Register a monitor; returns false if it was already registered
    pub fn register_monitor(&self, unit_key: &str, monitor: &Arc<dyn RunoutMonitor>) -> bool {
        let mut registrations = self.registrations.lock();
        let added = register(
            registrations.monitors.entry(unit_key.to_string()).or_default(),
            monitor,
        );
        if added {
            tracing::debug!(unit = %unit_key, monitor = %monitor.monitor_name(), "Runout monitor registered");
        }
        added
    }

    pub fn unregister_consumer(&self, unit_key: &str, consumer: &Arc<dyn RunoutConsumer>) -> bool {
        let mut registrations = self.registrations.lock();
        let Some(entries) = registrations.consumers.get_mut(unit_key) else {
            return false;
        };
        let target = Arc::downgrade(consumer);
        let before = entries.len();
        entries.retain(|entry| !Weak::ptr_eq(entry, &target));
        entries.len() != before
    }

    /// Deliver a runout to every consumer of the unit.
    ///
    /// Returns how many consumers handled it without error.
    pub fn notify_runout(&self, unit_key: &str, spool_index: Option<usize>) -> usize {
        let consumers = self.active_consumers(unit_key);
        tracing::info!(
            unit = %unit_key,
            spool_index = ?spool_index,
            consumers = consumers.len(),
            "Runout reported"
        );

        let mut handled = 0;
        for consumer in consumers {
            match consumer.handle_runout(spool_index) {
                Ok(()) => handled += 1,
                Err(err) => tracing::error!(
                    unit = %unit_key,
                    consumer = %consumer.consumer_name(),
                    error = %err,
                    "Failed to propagate runout"
                ),
            }
        }
        handled
    }

    pub fn active_consumers(&self, unit_key: &str) -> Vec<Arc<dyn RunoutConsumer>> {
        live(self.registrations.lock().consumers.get(unit_key))
    }

    pub fn active_monitors(&self, unit_key: &str) -> Vec<Arc<dyn RunoutMonitor>> {
        live(self.registrations.lock().monitors.get(unit_key))
    }
}

impl std::fmt::Debug for RunoutCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registrations = self.registrations.lock();
        f.debug_struct("RunoutCoordinator")
            .field("consumer_units", &registrations.consumers.len())
            .field("monitor_units", &registrations.monitors.len())
            .finish()
    }
}
