//! # LaneKit
//!
//! Lane state synchronization for multi-spool filament feeders (AMS units):
//! - Sensor edge detection and per-lane snapshots
//! - Reconciliation of which lane is loaded into each extruder
//! - Runout classification and cross-extruder handoff
//!
//! ## Architecture
//!
//! 1. **lanekit-core** - Event bus, clocks, name normalization, core errors
//! 2. **lanekit-lanedb** - Lane registry with alias and group lookup
//! 3. **lanekit-hardware** - Controller services, snapshots, runout coordinator
//! 4. **lanekit-settings** - Unit configuration and persisted printer state
//! 5. **lanekit-sync** - Per-unit sync engine and runout handling
//! 6. **lanekit** - Replay CLI that integrates all crates

pub mod replay;

pub use lanekit_core::{
    normalize_extruder_name, normalize_group_name, normalize_unit_name, same_extruder, Clock,
    Event, EventBus, EventBusConfig, EventPayload, EventRecord, EventType, HardwareError,
    ManualClock, MonotonicClock, SubscriptionId,
};

pub use lanekit_lanedb::{LaneRecord, LaneRegistration, LaneRegistry, RegistryError};

pub use lanekit_hardware::{
    ControllerStatus, FeederController, HardwareDirectory, HardwareService, LaneObservation,
    LaneSnapshot, RunoutConsumer, RunoutCoordinator, RunoutMonitor, SimulatedController,
};

pub use lanekit_settings::{
    Config, ConfigError, LaneSettings, PersistedStateCache, PersistedUnitState, SettingsError,
    UnitSettings,
};

pub use lanekit_sync::{
    reconcile, ControllerContext, HubHandle, LaneBinding, LaneConfig, LaneHandle, LaneReading,
    LaneState, LaneStatus, PrinterHost, Reconciliation, RunoutOutcome, SyncEngine,
    SyncEngineConfig, SyncError,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("LANEKIT_BUILD_DATE");

/// Initialize logging
///
/// Logs go to stderr so stdout stays free for event records. `RUST_LOG`
/// overrides the INFO default; `json` switches to one JSON object per line.
pub fn init_logging(json: bool) -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    if json {
        let fmt_layer = fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_current_span(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    } else {
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()?;
    }

    Ok(())
}
