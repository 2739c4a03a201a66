use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lanekit_core::{payload, EventBus, EventBusConfig, EventPayload, EventType};

fn bench_publish_no_subscribers(c: &mut Criterion) {
    let bus = EventBus::new();
    c.bench_function("publish_no_subscribers", |b| {
        b.iter(|| bus.publish(black_box(EventType::SpoolLoaded), EventPayload::new()))
    });
}

fn bench_publish_ten_subscribers(c: &mut Criterion) {
    let bus = EventBus::with_config(EventBusConfig {
        max_history_size: 1000,
        ..Default::default()
    });
    for priority in 0..10 {
        bus.subscribe(EventType::LaneHubLoaded, priority, |event| {
            black_box(event.payload.get_str("lane_name"));
            Ok(())
        });
    }

    c.bench_function("publish_ten_subscribers", |b| {
        b.iter(|| {
            bus.publish(
                EventType::LaneHubLoaded,
                payload! {
                    "unit_name" => "AMS_1",
                    "lane_name" => "lane1",
                    "spool_index" => 0,
                    "eventtime" => 1.0,
                },
            )
        })
    });
}

criterion_group!(
    benches,
    bench_publish_no_subscribers,
    bench_publish_ten_subscribers
);
criterion_main!(benches);
