// Copyright 2025 Ojima Abraham
// SPDX-License-Identifier: Apache-2.0

//! Benchmarks for engine-level storage operations.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use sedimentdb::model::{Operator, Value};
use sedimentdb::storage::{Engine, EngineConfig};
use tempfile::TempDir;

fn create_engine() -> (Engine, TempDir) {
    let dir = TempDir::new().unwrap();
    let engine = Engine::start(EngineConfig::new(dir.path().join("txn"))).unwrap();
    (engine, dir)
}

fn bench_add(c: &mut Criterion) {
    let (engine, _dir) = create_engine();
    let counter = std::sync::atomic::AtomicU64::new(0);

    c.bench_function("engine::add", |b| {
        b.iter_batched(
            || counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed) as i64,
            |record| black_box(engine.add("value", Value::Long(record), record).unwrap()),
            BatchSize::SmallInput,
        )
    });
}

fn bench_select_from_buffer(c: &mut Criterion) {
    let (engine, _dir) = create_engine();
    for i in 0..1000 {
        engine
            .add("name", Value::from(format!("v{i}").as_str()), i)
            .unwrap();
    }
    let counter = std::sync::atomic::AtomicU64::new(0);

    c.bench_function("engine::select_buffered", |b| {
        b.iter_batched(
            || (counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % 1000) as i64,
            |record| black_box(engine.select("name", record).unwrap().len()),
            BatchSize::SmallInput,
        )
    });
}

fn bench_select_from_database(c: &mut Criterion) {
    let (engine, _dir) = create_engine();
    for i in 0..1000 {
        engine
            .add("name", Value::from(format!("v{i}").as_str()), i)
            .unwrap();
    }
    engine.transport().unwrap();
    let counter = std::sync::atomic::AtomicU64::new(0);

    c.bench_function("engine::select_permanent", |b| {
        b.iter_batched(
            || (counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed) % 1000) as i64,
            |record| black_box(engine.select("name", record).unwrap().len()),
            BatchSize::SmallInput,
        )
    });
}

fn bench_explore(c: &mut Criterion) {
    let (engine, _dir) = create_engine();
    for i in 0..1000 {
        engine.add("age", Value::Long(i % 100), i).unwrap();
    }
    engine.transport().unwrap();

    c.bench_function("engine::explore_range", |b| {
        b.iter(|| {
            let result = engine
                .explore("age", Operator::GreaterThan, &[Value::Long(90)])
                .unwrap();
            black_box(result.len())
        })
    });
}

fn bench_transport(c: &mut Criterion) {
    let (engine, _dir) = create_engine();
    let counter = std::sync::atomic::AtomicU64::new(0);

    c.bench_function("engine::transport_100", |b| {
        b.iter_batched(
            || {
                let base = counter.fetch_add(100, std::sync::atomic::Ordering::Relaxed) as i64;
                for i in 0..100 {
                    engine.add("value", Value::Long(base + i), base + i).unwrap();
                }
            },
            |()| engine.transport().unwrap(),
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_add,
    bench_select_from_buffer,
    bench_select_from_database,
    bench_explore,
    bench_transport,
);
criterion_main!(benches);
