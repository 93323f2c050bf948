//! Throughput Benchmark for ttlhash
//!
//! This benchmark measures the field operations of the hash engine and the
//! cost of the active expire cycle under both index strategies.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;
use ttlhash::clock::ManualClock;
use ttlhash::config::{ExpireConfig, ExpireStrategy};
use ttlhash::storage::{ExpireTime, HashEngine, SetOptions, TtlUpdate};

const START: u64 = 1_700_000_000_000;

fn new_engine(strategy: ExpireStrategy) -> (HashEngine, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let config = ExpireConfig::new().with_strategy(strategy);
    (HashEngine::new(config, clock.clone()), clock)
}

fn ttl(ms: u64) -> SetOptions {
    SetOptions::new().with_ttl(TtlUpdate::Set(ExpireTime::After(ms)))
}

/// Benchmark field writes
fn bench_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_field");
    group.throughput(Throughput::Elements(1));

    for strategy in [ExpireStrategy::Coarse, ExpireStrategy::Fine] {
        let (mut engine, _clock) = new_engine(strategy);
        let key = Bytes::from("bench");
        let plain = SetOptions::new();

        group.bench_function(format!("{strategy}/no_ttl"), |b| {
            let mut i = 0u64;
            b.iter(|| {
                let field = Bytes::from(format!("field:{}", i % 10_000));
                engine
                    .set_field(0, &key, field, Bytes::from("value"), &plain)
                    .unwrap();
                i += 1;
            });
        });

        let (mut engine, _clock) = new_engine(strategy);
        group.bench_function(format!("{strategy}/with_ttl"), |b| {
            let mut i = 0u64;
            b.iter(|| {
                let field = Bytes::from(format!("field:{}", i % 10_000));
                engine
                    .set_field(0, &key, field, Bytes::from("value"), &ttl(60_000 + i % 1_000))
                    .unwrap();
                i += 1;
            });
        });
    }

    group.finish();
}

/// Benchmark field reads
fn bench_get(c: &mut Criterion) {
    let (mut engine, _clock) = new_engine(ExpireStrategy::Coarse);
    let key = Bytes::from("bench");

    // Pre-populate with data
    for i in 0..10_000u64 {
        engine
            .set_field(
                0,
                &key,
                Bytes::from(format!("field:{}", i)),
                Bytes::from(format!("value:{}", i)),
                &ttl(3_600_000),
            )
            .unwrap();
    }

    let mut group = c.benchmark_group("get_field");
    group.throughput(Throughput::Elements(1));

    group.bench_function("get_existing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let field = format!("field:{}", i % 10_000);
            black_box(engine.get_field(0, &key, field.as_bytes()).ok());
            i += 1;
        });
    });

    group.bench_function("get_missing", |b| {
        let mut i = 0u64;
        b.iter(|| {
            let field = format!("missing:{}", i);
            black_box(engine.get_field(0, &key, field.as_bytes()).ok());
            i += 1;
        });
    });

    group.finish();
}

/// Benchmark one active expire tick over a database full of expired fields
fn bench_active_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("active_expire_cycle");
    group.throughput(Throughput::Elements(1_000));
    group.measurement_time(Duration::from_secs(10));

    for strategy in [ExpireStrategy::Coarse, ExpireStrategy::Fine] {
        group.bench_function(format!("{strategy}/1000_fields"), |b| {
            b.iter_batched(
                || {
                    let (mut engine, clock) = new_engine(strategy);
                    for k in 0..100u64 {
                        let key = Bytes::from(format!("key:{}", k));
                        for f in 0..10u64 {
                            engine
                                .set_field(
                                    0,
                                    &key,
                                    Bytes::from(format!("f{}", f)),
                                    Bytes::from("v"),
                                    &ttl(10 + f),
                                )
                                .unwrap();
                        }
                    }
                    clock.advance(Duration::from_millis(100));
                    engine
                },
                |mut engine| black_box(engine.active_expire_cycle().unwrap()),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_set, bench_get, bench_active_cycle);
criterion_main!(benches);
