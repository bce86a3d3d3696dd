use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use sluice_core::config::FlowConfig;
use sluice_core::fields::Fields;
use sluice_core::tuple;
use sluice_core::tuple::Tuple;
use sluice_exec::{CoGroup, ElementGraph, GroupBy, LocalFlowProcess, StreamGraph};
use sluice_io::{MemoryTap, Tap};
use sluice_operators::aggregate::Count;
use sluice_operators::join::InnerJoin;
use sluice_operators::OperationKind;

fn fields(names: &[&str]) -> Fields {
    Fields::new(names.iter().copied()).unwrap()
}

fn facts(rows: usize, keys: i64) -> Vec<Tuple> {
    (0..rows)
        .map(|i| tuple![i as i64 % keys, format!("fact-{i}")])
        .collect()
}

fn dimension(keys: i64) -> Vec<Tuple> {
    (0..keys).map(|k| tuple![k, format!("dim-{k}")]).collect()
}

fn join_graph(hashed: bool) -> StreamGraph {
    let mut graph = ElementGraph::new();
    let facts_tap: Arc<dyn Tap> = Arc::new(MemoryTap::with_tuples("facts", fields(&["id", "fact"]), facts(4096, 256)));
    let dim_tap: Arc<dyn Tap> = Arc::new(MemoryTap::with_tuples("dim", fields(&["id", "dim"]), dimension(256)));
    let l = graph.source("facts", facts_tap);
    let r = graph.source("dim", dim_tap);
    let options = CoGroup::new(Fields::name("id"), Arc::new(InnerJoin)).declared(fields(&["id", "fact", "did", "dim"]));
    let joined = if hashed {
        graph.hash_join("join", &[l, r], options).unwrap()
    } else {
        graph.co_group("join", &[l, r], options).unwrap()
    };
    graph.sink(joined, Arc::new(MemoryTap::new("out", Fields::unknown()))).unwrap();
    let process = Arc::new(LocalFlowProcess::new(FlowConfig::default()));
    StreamGraph::build(graph, process).unwrap()
}

fn count_graph() -> StreamGraph {
    let mut graph = ElementGraph::new();
    let tap: Arc<dyn Tap> = Arc::new(MemoryTap::with_tuples("facts", fields(&["id", "fact"]), facts(4096, 64)));
    let src = graph.source("facts", tap);
    let grouped = graph.group_by("by_id", &[src], GroupBy::new(Fields::name("id"))).unwrap();
    let counted = graph
        .every(grouped, Fields::all(), OperationKind::aggregator(Count::default()), Fields::all())
        .unwrap();
    graph.sink(counted, Arc::new(MemoryTap::new("out", Fields::unknown()))).unwrap();
    let process = Arc::new(LocalFlowProcess::new(FlowConfig::default()));
    StreamGraph::build(graph, process).unwrap()
}

fn bench_joins(c: &mut Criterion) {
    let mut co_group = join_graph(false);
    c.bench_function("co_group_inner_join", |b| b.iter(|| co_group.execute().unwrap()));

    let mut hash_join = join_graph(true);
    c.bench_function("hash_join_inner_join", |b| b.iter(|| hash_join.execute().unwrap()));
}

fn bench_group_by(c: &mut Criterion) {
    let mut stream = count_graph();
    c.bench_function("group_by_count", |b| b.iter(|| stream.execute().unwrap()));
}

fn bench_fields_resolve(c: &mut Criterion) {
    let names: Vec<String> = (0..32).map(|i| format!("f{i}")).collect();
    let declared = Fields::new(names.clone()).unwrap();
    let selector = Fields::new(names.iter().rev().step_by(3).cloned()).unwrap();
    c.bench_function("fields_resolve", |b| {
        b.iter(|| Fields::resolve(&selector, &[&declared]).unwrap())
    });
}

criterion_group!(engine, bench_joins, bench_group_by, bench_fields_resolve);
criterion_main!(engine);
