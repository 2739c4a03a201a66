//! Hardware service against a simulated controller

use lanekit_core::{EventBus, EventType, HardwareError, ManualClock};
use lanekit_hardware::{
    HardwareDirectory, LaneObservation, SentCommand, SimulatedController, SOURCE_COMMAND,
};
use lanekit_lanedb::{LaneRegistration, LaneRegistry};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    bus: Arc<EventBus>,
    registry: Arc<LaneRegistry>,
    directory: HardwareDirectory,
    controller: Arc<SimulatedController>,
}

fn fixture() -> Fixture {
    let bus = Arc::new(EventBus::new());
    let registry = Arc::new(LaneRegistry::new());
    let directory = HardwareDirectory::new(
        bus.clone(),
        registry.clone(),
        Arc::new(ManualClock::new(10.0)),
    );
    let controller = Arc::new(SimulatedController::new("oams1", 4));
    directory.service("oams1").attach_controller(controller.clone());
    Fixture {
        bus,
        registry,
        directory,
        controller,
    }
}

#[test]
fn load_publishes_optimistic_event_with_lane() {
    let fx = fixture();
    fx.registry
        .register_lane(LaneRegistration::new("lane2", "oams1", 1, "extruder"))
        .unwrap();

    let service = fx.directory.service("oams1");
    service.load_spool(1).unwrap();

    let history = fx.bus.history(Some(&EventType::SpoolLoaded));
    assert_eq!(history.len(), 1);
    let payload = &history[0].payload;
    assert_eq!(payload.get_str("unit_name"), Some("oams1"));
    assert_eq!(payload.get_usize("spool_index"), Some(1));
    assert_eq!(payload.get_str("lane_name"), Some("lane2"));
    assert_eq!(payload.get_str("source"), Some(SOURCE_COMMAND));
    assert_eq!(history[0].timestamp, 10.0);

    assert_eq!(fx.controller.sent_commands(), vec![SentCommand::LoadSpool(1)]);
}

#[test]
fn unload_reports_controller_current_spool() {
    let fx = fixture();
    let service = fx.directory.service("oams1");
    fx.controller.set_current_spool(Some(3));

    service.unload_spool().unwrap();

    let history = fx.bus.history(Some(&EventType::SpoolUnloaded));
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].payload.get_usize("spool_index"), Some(3));
}

#[test]
fn follower_and_led_commands_are_forwarded() {
    let fx = fixture();
    let service = fx.directory.service("oams1");

    service.set_follower(true, 1).unwrap();
    service.set_led_error(2, 1).unwrap();

    assert_eq!(
        fx.controller.sent_commands(),
        vec![
            SentCommand::Follower {
                enable: true,
                direction: 1
            },
            SentCommand::LedError {
                spool_index: 2,
                value: 1
            },
        ]
    );
    let follower = fx.bus.history(Some(&EventType::FollowerChanged));
    assert_eq!(follower[0].payload.get_bool("enable"), Some(true));
}

#[test]
fn snapshot_lookup_by_spool_uses_registry_then_snapshots() {
    let fx = fixture();
    let service = fx.directory.service("oams1");

    // Not registered: found through the recorded snapshot
    service.update_lane_snapshot(
        LaneObservation::new("AMS_1", "lane7", true, 1.0).with_spool_index(3),
    );
    assert_eq!(service.resolve_lane_for_spool("AMS_1", 3).as_deref(), Some("lane7"));
    let snapshot = service.latest_lane_snapshot_for_spool("AMS_1", 3).unwrap();
    assert_eq!(snapshot.lane_state, Some(true));

    // Registered: the registry answers
    fx.registry
        .register_lane(LaneRegistration::new("lane1", "AMS_1", 0, "extruder"))
        .unwrap();
    assert_eq!(service.resolve_lane_for_spool("AMS_1", 0).as_deref(), Some("lane1"));
    assert!(service.latest_lane_snapshot_for_spool("AMS_1", 0).is_none());
}

#[test]
fn spool_event_can_be_suppressed() {
    let fx = fixture();
    let service = fx.directory.service("oams1");

    let edges = service.update_lane_snapshot(
        LaneObservation::new("AMS_1", "lane4", true, 1.0)
            .with_hub(Some(false))
            .with_tool(Some(false))
            .without_spool_event(),
    );
    assert_eq!(
        edges,
        vec![EventType::LaneHubUnloaded, EventType::LaneToolUnloaded]
    );
    assert!(fx.bus.history(Some(&EventType::SpoolLoaded)).is_empty());

    // Same observation again: nothing changes, nothing is published
    let edges = service.update_lane_snapshot(
        LaneObservation::new("AMS_1", "lane4", true, 2.0)
            .with_hub(Some(false))
            .with_tool(Some(false)),
    );
    assert!(edges.is_empty());

    let edges = service.update_lane_snapshot(
        LaneObservation::new("AMS_1", "lane4", true, 3.0)
            .with_hub(Some(true))
            .with_tool(Some(true)),
    );
    assert_eq!(edges, vec![EventType::LaneHubLoaded, EventType::LaneToolLoaded]);
}

#[tokio::test]
async fn load_and_wait_returns_when_hub_triggers() {
    let fx = fixture();
    fx.controller.set_hub_follows_load(true);
    let service = fx.directory.service("oams1");

    service
        .load_spool_and_wait(2, Duration::from_millis(500))
        .await
        .unwrap();
    assert_eq!(service.latest_status().unwrap().hub_sensor(2), Some(true));
}

#[tokio::test]
async fn load_and_wait_times_out() {
    let fx = fixture();
    let service = fx.directory.service("oams1");

    let err = service
        .load_spool_and_wait(1, Duration::from_millis(120))
        .await
        .unwrap_err();
    assert_eq!(err, HardwareError::Timeout { timeout_ms: 120 });
    // The load itself went out
    assert_eq!(fx.controller.sent_commands(), vec![SentCommand::LoadSpool(1)]);
}

#[tokio::test]
async fn load_and_wait_sees_late_hub() {
    let fx = fixture();
    let service = fx.directory.service("oams1");

    let controller = fx.controller.clone();
    let raise = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(80)).await;
        controller.set_hub(0, true);
    });

    service
        .load_spool_and_wait(0, Duration::from_secs(2))
        .await
        .unwrap();
    raise.await.unwrap();
}

#[test]
fn command_event_names_the_registered_lane_of_its_bay() {
    let fx = fixture();
    let service = fx.directory.service("oams1");

    // Two units share this controller; both have seen a lane in bay 2
    service.update_lane_snapshot(
        LaneObservation::new("AMS_2", "lane10", true, 1.0).with_spool_index(2),
    );
    service.update_lane_snapshot(
        LaneObservation::new("AMS_1", "lane3", true, 2.0).with_spool_index(2),
    );
    service.update_lane_snapshot(
        LaneObservation::new("AMS_2", "lane10", false, 3.0).with_spool_index(2),
    );
    fx.registry
        .register_lane(LaneRegistration::new("lane3", "AMS_1", 2, "extruder"))
        .unwrap();

    service.load_spool(2).unwrap();

    let history = fx.bus.history(Some(&EventType::SpoolLoaded));
    let command = history
        .iter()
        .find(|record| record.payload.get_str("source") == Some(SOURCE_COMMAND))
        .unwrap();
    assert_eq!(command.payload.get_str("lane_name"), Some("lane3"));
    assert_eq!(command.payload.get_str("lane_unit"), Some("AMS_1"));
}

#[test]
fn unregistered_bay_uses_latest_snapshot() {
    let fx = fixture();
    let service = fx.directory.service("oams1");
    service.update_lane_snapshot(
        LaneObservation::new("AMS_1", "lane3", true, 5.0).with_spool_index(1),
    );
    service.update_lane_snapshot(
        LaneObservation::new("AMS_2", "lane10", true, 7.0).with_spool_index(1),
    );

    service.load_spool(1).unwrap();

    let history = fx.bus.history(Some(&EventType::SpoolLoaded));
    let command = history
        .iter()
        .find(|record| record.payload.get_str("source") == Some(SOURCE_COMMAND))
        .unwrap();
    assert_eq!(command.payload.get_str("lane_name"), Some("lane10"));
}

#[test]
fn subscriber_may_call_back_into_the_service() {
    let fx = fixture();
    let service = fx.directory.service("oams1");
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

    let inner = service.clone();
    let record = seen.clone();
    fx.bus.subscribe(EventType::SpoolLoaded, 0, move |event| {
        let lane = event.payload.get_str("lane_name").unwrap_or_default().to_string();
        // Reads and writes the snapshot table while the edge is being published
        let snapshot = inner.latest_lane_snapshot("AMS_1", &lane);
        record.lock().unwrap().push(snapshot.and_then(|s| s.lane_state));
        inner.update_lane_snapshot(
            LaneObservation::new("AMS_1", &lane, true, 2.0)
                .with_hub(Some(true))
                .without_spool_event(),
        );
        inner.poll_status();
        Ok(())
    });

    let edges = service.update_lane_snapshot(LaneObservation::new("AMS_1", "lane1", true, 1.0));

    assert_eq!(edges, vec![EventType::SpoolLoaded]);
    assert_eq!(*seen.lock().unwrap(), vec![Some(true)]);
    assert_eq!(fx.bus.history(Some(&EventType::LaneHubLoaded)).len(), 1);
    assert_eq!(
        service.latest_lane_snapshot("AMS_1", "lane1").unwrap().hub_state,
        Some(true)
    );
}
