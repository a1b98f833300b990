use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use waypoint_checkpoint::InMemoryCheckpointStore;
use waypoint_core::{
    AppendReducer, BoundedLoop, Engine, NodeOutput, State, StateDelta, StateGraph, StateSchema, Turn,
};

fn loop_graph() -> StateGraph {
    let mut graph = StateGraph::new();
    graph
        .add_node("intake", |_state| async { Ok(NodeOutput::Update(StateDelta::new())) })
        .add_node("work", |state| async move {
            let score = state.field_f64("score").unwrap_or(0.0) + 1.0;
            Ok(NodeOutput::Update(StateDelta::new().with_field("score", score)))
        })
        .add_node("gate", |_state| async { Ok(NodeOutput::Update(StateDelta::new())) })
        .add_node("finish", |state| async move {
            Ok(NodeOutput::Update(
                StateDelta::new().with_output(json!({"score": state.field("score")})),
            ))
        })
        .set_entry("intake")
        .add_edge("intake", "work")
        .add_edge("work", "gate")
        .add_bounded_loop(
            BoundedLoop::new("attempts", 3)
                .body("work")
                .gate("gate")
                .exit_to("finish")
                .retry_when(|state| state.field_f64("score").unwrap_or(0.0) < 10.0),
        )
        .add_finish("finish");
    graph
}

fn compile_benchmark(c: &mut Criterion) {
    c.bench_function("compile loop graph", |b| {
        b.iter(|| black_box(loop_graph()).compile().unwrap());
    });
}

fn state_merge_benchmark(c: &mut Criterion) {
    let schema = StateSchema::new().with_reducer("log", Arc::new(AppendReducer));

    c.bench_function("merge 50 deltas", |b| {
        b.iter(|| {
            let mut state = State::new(json!({"query": "What is Apple's current stock price?"}));
            for i in 0..50 {
                let delta = StateDelta::new()
                    .with_field("log", format!("entry {}", i))
                    .with_field("confidence", i as f64 / 10.0)
                    .push_turn(Turn::assistant("partial answer"));
                schema.apply(&mut state, black_box(delta)).unwrap();
            }
            state
        });
    });
}

fn execution_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let engine = Engine::new(
        loop_graph().compile().unwrap(),
        Arc::new(InMemoryCheckpointStore::new()),
    );

    let mut run = 0u64;
    c.bench_function("run exhausting loop (memory store)", |b| {
        b.to_async(&runtime).iter(|| {
            run += 1;
            let thread_id = format!("bench-{}", run);
            let engine = &engine;
            async move {
                engine.start(&thread_id, json!("bench")).await.unwrap();
            }
        });
    });
}

criterion_group!(benches, compile_benchmark, state_merge_benchmark, execution_benchmark);
criterion_main!(benches);
