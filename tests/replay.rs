use lanekit::replay::{read_frames, Frame, Replay};
use lanekit::{Config, EventType};
use std::io::Write;
use tempfile::NamedTempFile;

fn trace(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
    file
}

fn cross_extruder_config() -> Config {
    let toml = r#"
        [[units]]
        name = "AMS_1"
        hardware = "oams1"
        extruder = "extruder"

        [[units.lanes]]
        name = "lane1"
        spool_index = 0
        runout_lane = "lane2"

        [[units.lanes]]
        name = "lane2"
        spool_index = 1
        extruder = "extruder1"
    "#;
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(toml.as_bytes()).unwrap();
    Config::load_from_file(file.path()).unwrap()
}

#[test]
fn test_read_frames_skips_comments_and_blank_lines() {
    let file = trace(&[
        "# recorded on the bench",
        r#"{"t": 1.0, "feed": [true, false], "printing": true}"#,
        "",
        r#"{"t": 2.0, "tool": {"lane1": true}}"#,
    ]);

    let frames = read_frames(file.path()).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].feed, Some(vec![true, false]));
    assert_eq!(frames[0].printing, Some(true));
    assert_eq!(frames[1].feed, None);
    assert_eq!(frames[1].tool.get("lane1"), Some(&true));
}

#[test]
fn test_read_frames_reports_bad_line() {
    let file = trace(&[r#"{"t": 1.0}"#, "{not json"]);
    let err = read_frames(file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains(":2: invalid frame"));
}

#[test]
fn test_replay_cross_extruder_runout() {
    let replay = Replay::new(&cross_extruder_config()).unwrap();
    let frames = [
        Frame {
            t: 1.0,
            feed: Some(vec![true, true, false, false]),
            printing: Some(true),
            ..Default::default()
        },
        Frame {
            t: 2.0,
            feed: Some(vec![false, true, false, false]),
            ..Default::default()
        },
        Frame {
            t: 3.0,
            feed: Some(vec![false, true, false, false]),
            ..Default::default()
        },
    ];
    for frame in &frames {
        replay.apply(frame).unwrap();
    }

    let summary = replay.summary();
    assert_eq!(summary.frames, 3);
    assert_eq!(summary.handoffs, 1);
    assert_eq!(summary.pauses, 0);

    let runouts: Vec<_> = replay
        .history()
        .into_iter()
        .filter(|record| record.event_type == EventType::RunoutClassified)
        .collect();
    assert_eq!(runouts.len(), 1);
    assert_eq!(runouts[0].payload.get_str("outcome"), Some("cross_extruder"));
    assert_eq!(runouts[0].payload.get_str("target"), Some("lane2"));
    assert_eq!(runouts[0].timestamp, 2.0);
}

#[test]
fn test_replay_default_unit_uses_native_runout() {
    let replay = Replay::new(&Config::default()).unwrap();
    replay
        .apply(&Frame {
            t: 5.0,
            feed: Some(vec![false, false, true, false]),
            printing: Some(true),
            ..Default::default()
        })
        .unwrap();
    replay
        .apply(&Frame {
            t: 6.0,
            feed: Some(vec![false, false, false, false]),
            ..Default::default()
        })
        .unwrap();

    let summary = replay.summary();
    assert_eq!(summary.native_runouts, 1);
    assert_eq!(summary.handoffs, 0);

    let unloaded = replay
        .history()
        .into_iter()
        .filter(|record| {
            record.event_type == EventType::SpoolUnloaded
                && record.payload.get_bool("previous") == Some(true)
        })
        .count();
    assert_eq!(unloaded, 1);
}

#[test]
fn test_replay_idle_unload_is_not_a_runout() {
    let replay = Replay::new(&Config::default()).unwrap();
    for (t, present) in [(1.0, true), (2.0, false)] {
        replay
            .apply(&Frame {
                t,
                feed: Some(vec![present, false, false, false]),
                printing: Some(false),
                ..Default::default()
            })
            .unwrap();
    }

    let summary = replay.summary();
    assert_eq!(summary.native_runouts, 0);
    assert!(replay
        .history()
        .iter()
        .all(|record| record.event_type != EventType::RunoutClassified));
}

#[test]
fn test_replay_rejects_unknown_unit() {
    let replay = Replay::new(&Config::default()).unwrap();
    let err = replay
        .apply(&Frame {
            t: 1.0,
            unit: Some("AMS_9".to_string()),
            ..Default::default()
        })
        .unwrap_err();
    assert!(err.to_string().contains("AMS_9"));
}
