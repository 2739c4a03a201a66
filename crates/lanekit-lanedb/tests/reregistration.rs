//! Only the latest registration of a lane is reachable from any index

use lanekit_lanedb::{LaneRegistration, LaneRegistry};
use proptest::prelude::*;
use std::sync::Arc;

const UNITS: [&str; 3] = ["AMS_1", "AMS_2", "AMS_3"];
const EXTRUDERS: [&str; 3] = ["extruder", "extruder4", "extruder5"];
const GROUPS: [&str; 3] = ["T1", "T4", "T5"];

fn registration(unit: usize, spool: usize, extruder: usize, group: usize) -> LaneRegistration {
    LaneRegistration::new("lane1", UNITS[unit], spool, EXTRUDERS[extruder]).with_group(GROUPS[group])
}

proptest! {
    #[test]
    fn latest_registration_owns_every_index(
        steps in proptest::collection::vec((0usize..3, 0usize..4, 0usize..3, 0usize..3), 1..12)
    ) {
        let registry = LaneRegistry::new();
        let mut latest = None;
        for (unit, spool, extruder, group) in &steps {
            latest = Some(
                registry
                    .register_lane(registration(*unit, *spool, *extruder, *group))
                    .unwrap(),
            );
        }
        let latest = latest.unwrap();
        let (unit, spool, extruder, group) = *steps.last().unwrap();

        prop_assert_eq!(registry.len(), 1);
        prop_assert!(Arc::ptr_eq(&registry.get_by_lane("lane1").unwrap(), &latest));

        for u in 0..3 {
            for s in 0..4 {
                let found = registry.get_by_spool(UNITS[u], s);
                if (u, s) == (unit, spool) {
                    prop_assert!(Arc::ptr_eq(&found.unwrap(), &latest));
                } else {
                    prop_assert!(found.is_none());
                }
            }
        }

        for (e, name) in EXTRUDERS.iter().enumerate() {
            let lanes = registry.get_by_extruder(name);
            if e == extruder {
                prop_assert_eq!(lanes.len(), 1);
                prop_assert!(Arc::ptr_eq(&lanes[0], &latest));
            } else {
                prop_assert!(lanes.is_empty());
            }
        }

        for (g, name) in GROUPS.iter().enumerate() {
            let found = registry.get_by_group(name);
            if g == group {
                prop_assert!(Arc::ptr_eq(&found.unwrap(), &latest));
            } else {
                prop_assert!(found.is_none());
            }
        }
    }
}

#[test]
fn concurrent_readers_see_a_complete_record() {
    let registry = Arc::new(LaneRegistry::new());
    registry.register_lane(registration(0, 0, 0, 0)).unwrap();

    let writer = {
        let registry = registry.clone();
        std::thread::spawn(move || {
            for i in 0..200 {
                registry
                    .register_lane(registration(i % 3, i % 4, i % 3, i % 3))
                    .unwrap();
            }
        })
    };

    for _ in 0..200 {
        if let Some(record) = registry.get_by_lane("lane1") {
            let by_spool = registry.get_by_spool(&record.unit_name, record.spool_index);
            // The slot may have moved on, but never to a different lane
            if let Some(by_spool) = by_spool {
                assert_eq!(by_spool.lane_name, "lane1");
            }
        }
    }

    writer.join().unwrap();
    assert_eq!(registry.len(), 1);
}
