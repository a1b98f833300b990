use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use waypoint_checkpoint::{
    Checkpoint, CheckpointStatus, CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore,
};

fn state(step: u64) -> serde_json::Value {
    json!({
        "input": {"query": "What is Apple's current stock price?"},
        "turns": [{"role": "user", "content": "What is Apple's current stock price?"}],
        "fields": {"confidence": 5.5, "step": step},
        "counters": {"research_attempts": step % 3}
    })
}

fn memory_put_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("memory put 10 steps", |b| {
        b.to_async(&runtime).iter(|| async {
            let store = InMemoryCheckpointStore::new();
            for step in 0..10 {
                let checkpoint = Checkpoint::new("bench", step, CheckpointStatus::Running, state(step));
                store.put(black_box(checkpoint)).await.unwrap();
            }
        });
    });
}

fn memory_latest_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryCheckpointStore::new();
    runtime.block_on(async {
        for step in 0..100 {
            let checkpoint = Checkpoint::new("bench", step, CheckpointStatus::Running, state(step));
            store.put(checkpoint).await.unwrap();
        }
    });

    c.bench_function("memory get_latest", |b| {
        b.to_async(&runtime).iter(|| async {
            store.get_latest(black_box("bench")).await.unwrap();
        });
    });
}

fn sqlite_put_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("sqlite put 10 steps", |b| {
        b.to_async(&runtime).iter(|| async {
            let store = SqliteCheckpointStore::in_memory().await.unwrap();
            for step in 0..10 {
                let checkpoint = Checkpoint::new("bench", step, CheckpointStatus::Running, state(step));
                store.put(black_box(checkpoint)).await.unwrap();
            }
        });
    });
}

criterion_group!(benches, memory_put_benchmark, memory_latest_benchmark, sqlite_put_benchmark);
criterion_main!(benches);
