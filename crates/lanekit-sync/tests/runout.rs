//! Runout classification against recorded collaborators

mod common;

use common::{fixture, fixture_with, RecordingHost, HARDWARE, UNIT};
use lanekit_core::EventType;
use lanekit_lanedb::LaneRegistration;
use lanekit_settings::PersistedStateCache;
use lanekit_sync::{LaneConfig, RunoutOutcome, SyncEngineConfig, SyncError};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tempfile::TempDir;

fn runout_records(fx: &common::Fixture) -> Vec<(String, Option<String>)> {
    fx.context
        .bus()
        .history(Some(&EventType::RunoutClassified))
        .into_iter()
        .map(|record| {
            (
                record.payload.get_str("outcome").unwrap_or_default().to_string(),
                record.payload.get_str("target").map(str::to_string),
            )
        })
        .collect()
}

#[test]
fn same_extruder_runout_flags_lane_without_handoff() {
    let fx = fixture(
        vec![
            LaneConfig::new("L1", 0, "extruder").with_runout_lane("L2"),
            LaneConfig::new("L2", 1, "extruder"),
        ],
        RecordingHost::printing(),
    );

    fx.feed("L1", true, 1.0);
    fx.feed("L1", false, 2.0);

    assert!(fx.engine.runout_in_progress("L1"));
    assert!(fx.host.handoffs().is_empty());
    assert!(fx.host.native().is_empty());
    assert_eq!(
        runout_records(&fx),
        vec![("same_extruder".to_string(), Some("L2".to_string()))]
    );

    // Reloading the lane clears the flag
    fx.feed("L1", true, 3.0);
    assert!(!fx.engine.runout_in_progress("L1"));
}

#[test]
fn cross_extruder_runout_hands_off_exactly_once() {
    let fx = fixture(
        vec![
            LaneConfig::new("L1", 0, "extruder").with_runout_lane("L2"),
            LaneConfig::new("L2", 1, "extruder1"),
        ],
        RecordingHost::printing(),
    );

    fx.feed("L1", true, 1.0);
    fx.feed("L1", false, 2.0);
    // Still empty, no new edge
    fx.feed("L1", false, 2.5);

    assert_eq!(
        fx.host.handoffs(),
        vec![("L1".to_string(), "L2".to_string())]
    );
    assert!(fx.host.pauses().is_empty());
    assert_eq!(runout_records(&fx).len(), 1);
}

#[test]
fn cross_extruder_runout_leaves_flag_clear() {
    let fx = fixture(
        vec![
            LaneConfig::new("L1", 0, "extruder").with_runout_lane("L2"),
            LaneConfig::new("L2", 1, "extruder1"),
        ],
        RecordingHost::printing(),
    );

    fx.feed("L1", true, 1.0);
    fx.feed("L1", false, 2.0);
    assert!(!fx.engine.runout_in_progress("L1"));
    assert!(!fx.engine.lane_status("L1").unwrap().runout_in_progress);

    // A later runout report on the same lane is dispatched again
    assert_eq!(
        fx.engine.classify_runout("L1", 3.0).unwrap(),
        RunoutOutcome::CrossExtruder {
            target: "L2".to_string()
        }
    );
    assert_eq!(fx.host.handoffs().len(), 2);
}

#[test]
fn same_extruder_runout_is_not_dispatched_twice() {
    let fx = fixture(
        vec![
            LaneConfig::new("L1", 0, "extruder").with_runout_lane("L2"),
            LaneConfig::new("L2", 1, "extruder"),
        ],
        RecordingHost::printing(),
    );

    assert!(matches!(
        fx.engine.classify_runout("L1", 2.0).unwrap(),
        RunoutOutcome::SameExtruder { .. }
    ));
    assert_eq!(
        fx.engine.classify_runout("L1", 2.5).unwrap(),
        RunoutOutcome::AlreadyInProgress
    );
    assert_eq!(runout_records(&fx).len(), 1);
}

#[test]
fn native_runout_leaves_flag_clear() {
    let fx = fixture(
        vec![LaneConfig::new("L1", 0, "extruder")],
        RecordingHost::printing(),
    );

    fx.engine.classify_runout("L1", 2.0).unwrap();
    assert!(!fx.engine.runout_in_progress("L1"));
    fx.engine.classify_runout("L1", 3.0).unwrap();
    assert_eq!(fx.host.native().len(), 2);
}

#[test]
fn unresolvable_target_uses_native_runout() {
    let fx = fixture(
        vec![LaneConfig::new("L1", 0, "extruder").with_runout_lane("lane_missing")],
        RecordingHost::printing(),
    );

    fx.feed("L1", true, 1.0);
    fx.feed("L1", false, 2.0);

    assert_eq!(
        fx.host.native(),
        vec![(Some("extruder".to_string()), "L1".to_string())]
    );
    assert!(fx.host.handoffs().is_empty());
    assert!(fx.host.pauses().is_empty());
    assert_eq!(runout_records(&fx)[0].0, "native_runout");
}

#[test]
fn feed_drop_while_idle_is_not_a_runout() {
    let fx = fixture(
        vec![
            LaneConfig::new("L1", 0, "extruder").with_runout_lane("L2"),
            LaneConfig::new("L2", 1, "extruder1"),
        ],
        Arc::new(RecordingHost::default()),
    );

    fx.feed("L1", true, 1.0);
    fx.feed("L1", false, 2.0);

    assert!(!fx.engine.runout_in_progress("L1"));
    assert!(runout_records(&fx).is_empty());
    assert_eq!(fx.lane("L1").calls(), vec!["prep:true", "load:true", "prep:false", "load:false"]);
}

#[test]
fn first_observation_empty_is_not_a_runout() {
    let fx = fixture(
        vec![LaneConfig::new("L1", 0, "extruder")],
        RecordingHost::printing(),
    );

    fx.feed("L1", false, 1.0);

    assert!(runout_records(&fx).is_empty());
    assert!(fx.host.native().is_empty());
}

#[test]
fn command_unload_does_not_trigger_runout() {
    let fx = fixture(
        vec![LaneConfig::new("L1", 0, "extruder").with_runout_lane("L2")],
        RecordingHost::printing(),
    );
    fx.controller.set_current_spool(Some(0));

    fx.engine.hardware().unload_spool().unwrap();

    assert!(runout_records(&fx).is_empty());
}

#[test]
fn group_alias_resolves_target() {
    let fx = fixture(
        vec![
            LaneConfig::new("L1", 0, "extruder").with_runout_lane("t1"),
            LaneConfig::new("L2", 1, "extruder1").with_group("T1"),
        ],
        RecordingHost::printing(),
    );

    fx.feed("L1", true, 1.0);
    fx.feed("L1", false, 2.0);

    assert_eq!(
        fx.host.handoffs(),
        vec![("L1".to_string(), "L2".to_string())]
    );
}

#[test]
fn registry_token_resolves_lane_of_another_unit() {
    let fx = fixture(
        vec![LaneConfig::new("L1", 0, "extruder").with_runout_lane("Group T5")],
        RecordingHost::printing(),
    );
    fx.context
        .registry()
        .register_lane(LaneRegistration::new("lane9", "AMS_2", 0, "extruder2").with_group("T5"))
        .unwrap();

    let outcome = fx.engine.classify_runout("L1", 5.0).unwrap();
    assert_eq!(
        outcome,
        RunoutOutcome::CrossExtruder {
            target: "lane9".to_string()
        }
    );
}

#[test]
fn unresolvable_extruder_pauses() {
    let fx = fixture(
        vec![LaneConfig::new("L1", 0, "extruder").with_runout_lane("lane9")],
        RecordingHost::printing(),
    );
    fx.context
        .registry()
        .register_lane(LaneRegistration::new("lane9", "AMS_2", 0, "  "))
        .unwrap();

    let outcome = fx.engine.classify_runout("L1", 5.0).unwrap();
    assert!(matches!(outcome, RunoutOutcome::Paused { .. }));
    assert_eq!(fx.host.pauses().len(), 1);
    assert!(fx.host.handoffs().is_empty());
    assert!(fx.host.native().is_empty());
}

#[test]
fn failed_handoff_is_returned() {
    let host = RecordingHost::printing();
    host.fail_handoff.store(true, Ordering::SeqCst);
    let fx = fixture(
        vec![
            LaneConfig::new("L1", 0, "extruder").with_runout_lane("L2"),
            LaneConfig::new("L2", 1, "extruder1"),
        ],
        host,
    );

    let err = fx.engine.classify_runout("L1", 5.0).unwrap_err();
    assert_eq!(
        err,
        SyncError::Handoff {
            origin: "L1".to_string(),
            target: "L2".to_string(),
            reason: "toolchanger busy".to_string(),
        }
    );
    assert_eq!(
        runout_records(&fx),
        vec![("handoff_failed".to_string(), Some("L2".to_string()))]
    );
}

#[test]
fn failed_handoff_can_be_retried() {
    let host = RecordingHost::printing();
    host.fail_handoff.store(true, Ordering::SeqCst);
    let fx = fixture(
        vec![
            LaneConfig::new("L1", 0, "extruder").with_runout_lane("L2"),
            LaneConfig::new("L2", 1, "extruder1"),
        ],
        host,
    );

    assert!(fx.engine.classify_runout("L1", 5.0).is_err());
    assert!(!fx.engine.runout_in_progress("L1"));

    fx.host.fail_handoff.store(false, Ordering::SeqCst);
    assert_eq!(
        fx.engine.classify_runout("L1", 6.0).unwrap(),
        RunoutOutcome::CrossExtruder {
            target: "L2".to_string()
        }
    );
    assert_eq!(fx.host.handoffs().len(), 2);
    assert_eq!(
        runout_records(&fx),
        vec![
            ("handoff_failed".to_string(), Some("L2".to_string())),
            ("cross_extruder".to_string(), Some("L2".to_string())),
        ]
    );
}

#[test]
fn persisted_runout_lane_is_the_fallback() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("AFC.var.unit");
    std::fs::write(&path, r#"{"AMS_1": {"L1": {"runout_lane": "L2"}}}"#).unwrap();

    let fx = fixture_with(
        vec![
            LaneConfig::new("L1", 0, "extruder"),
            LaneConfig::new("L2", 1, "extruder"),
        ],
        RecordingHost::printing(),
        SyncEngineConfig::new(UNIT, HARDWARE)
            .with_persisted_state(Arc::new(PersistedStateCache::new(&path))),
    );

    assert_eq!(
        fx.engine.classify_runout("L1", 5.0).unwrap(),
        RunoutOutcome::SameExtruder {
            target: "L2".to_string()
        }
    );
}

#[test]
fn coordinator_notification_classifies_bay() {
    let fx = fixture(
        vec![
            LaneConfig::new("L1", 0, "extruder").with_runout_lane("L2"),
            LaneConfig::new("L2", 1, "extruder1"),
        ],
        RecordingHost::printing(),
    );

    assert_eq!(fx.context.runout().notify_runout(HARDWARE, Some(0)), 1);
    assert_eq!(
        fx.host.handoffs(),
        vec![("L1".to_string(), "L2".to_string())]
    );

    // Bay without a lane of this unit
    assert_eq!(fx.context.runout().notify_runout(HARDWARE, Some(3)), 0);
}

#[test]
fn stopped_engine_ignores_events() {
    let fx = fixture(
        vec![
            LaneConfig::new("L1", 0, "extruder").with_runout_lane("L2"),
            LaneConfig::new("L2", 1, "extruder1"),
        ],
        RecordingHost::printing(),
    );
    fx.engine.stop();

    fx.feed("L1", true, 1.0);
    fx.feed("L1", false, 2.0);

    assert!(fx.host.handoffs().is_empty());
    assert!(fx.context.runout().active_consumers(HARDWARE).is_empty());
    assert!(fx.lane("L1").calls().is_empty());
}
