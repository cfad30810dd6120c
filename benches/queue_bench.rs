// benches/queue_bench.rs
//! Event queue throughput

use capture_engine::instrumentation::CapturedEvent;
use capture_engine::recording::event_queue::{bounded, BackpressurePolicy};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

const EVENTS: u64 = 10_000;

fn bench_single_producer(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_queue");
    group.throughput(Throughput::Elements(EVENTS));

    for capacity in [16usize, 1024] {
        for policy in [BackpressurePolicy::Block, BackpressurePolicy::Drop] {
            let id = BenchmarkId::new(format!("{:?}", policy), capacity);
            group.bench_with_input(id, &capacity, |b, &capacity| {
                b.iter(|| {
                    let (producer, consumer) = bounded(capacity, policy);
                    let drain = std::thread::spawn(move || {
                        let mut received = 0u64;
                        while consumer.pop().is_some() {
                            received += 1;
                        }
                        received
                    });

                    for i in 0..EVENTS {
                        let event = CapturedEvent::new("demo.UserGuess", json!({ "guess": i }));
                        let _ = producer.push(black_box(event));
                    }
                    drop(producer);
                    black_box(drain.join().unwrap())
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_single_producer);
criterion_main!(benches);
