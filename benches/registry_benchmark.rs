//! Admission and write-path benchmarks against the in-process store.
//!
//! Run with:
//! ```
//! cargo bench --bench registry_benchmark
//! ```

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::time::Duration;
use tagsync_rs::tag::TAG_PROPERTIES;
use tagsync_rs::{
    Batch, Command, FieldValue, MemoryStore, Tag, TagContext, TagFields, TagManager,
};

// =============================================================================
// ADMISSION
// =============================================================================

fn bench_admission(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("registry/admit");
    group.sample_size(10);
    group.warm_up_time(Duration::from_secs(1));
    group.measurement_time(Duration::from_secs(3));

    for count in [10u64, 100, 1_000] {
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("memory", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| async move {
                let store = MemoryStore::new();
                let ctx = TagContext::in_memory(&store);
                let mut manager = TagManager::new("@pressure");
                for i in 0..count {
                    let tag = Tag::new(&ctx, format!("tank-{i}"), format!("tank {i}"), 0, 100);
                    manager.admit(tag).await.expect("admit");
                }
                manager.shutdown_all().await;
                black_box(manager.len())
            })
        });
    }

    group.finish();
}

// =============================================================================
// WRITE PATH
// =============================================================================

fn bench_write_through(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let store = MemoryStore::new();
    let ctx = TagContext::in_memory(&store);
    let mut manager = TagManager::new("@pressure");
    rt.block_on(manager.admit(Tag::new(&ctx, "tank-0", "tank 0", 0, 100)))
        .expect("admit");

    let mut group = c.benchmark_group("registry/set");
    group.sample_size(20);
    group.bench_function("value", |b| {
        let mut next = 0i32;
        b.to_async(&rt).iter(|| {
            next = next.wrapping_add(1);
            let value = FieldValue::Int(next);
            let manager = &manager;
            async move {
                manager
                    .set("@pressure:tank-0", "value", value)
                    .await
                    .expect("set")
            }
        })
    });
    group.finish();

    rt.block_on(manager.shutdown_all());
}

fn bench_batch_commit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let store = MemoryStore::new();

    c.bench_function("batch/commit_4_sets_4_gets", |b| {
        b.to_async(&rt).iter(|| async {
            let mut batch = Batch::new();
            for i in 1..=4 {
                batch.queue(Command::set(format!("key:pipe:{i}"), i));
            }
            for i in 1..=4 {
                batch.queue(Command::get(format!("key:pipe:{i}")));
            }
            black_box(batch.commit(&store).await.expect("commit"))
        })
    });
}

// =============================================================================
// PROPERTY TABLE
// =============================================================================

fn bench_property_table(c: &mut Criterion) {
    let mut fields = TagFields {
        name: "@pressure:tank-0".to_string(),
        description: "tank 0".to_string(),
        value: 0,
        quality: 100,
        timestamp: 0,
    };

    let mut group = c.benchmark_group("property");
    group.bench_function("read", |b| {
        b.iter(|| black_box(TAG_PROPERTIES.read(&fields, black_box("Quality")).expect("read")))
    });
    group.bench_function("write", |b| {
        b.iter(|| {
            TAG_PROPERTIES
                .write(&mut fields, black_box("value"), FieldValue::Int(7))
                .expect("write")
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_admission,
    bench_write_through,
    bench_batch_commit,
    bench_property_table
);
criterion_main!(benches);
