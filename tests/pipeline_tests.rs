//! End-to-end pipelines: per-record stages, groupings, traps and the
//! graph lifecycle.

mod common;

use std::sync::Arc;

use common::{build, execute, fields, sink_tap, source_tap};
use sluice_core::config::{AssertionLevel, FlowConfig};
use sluice_core::entry::{Entry, EntryView};
use sluice_core::fields::Fields;
use sluice_core::process::{Counter, FlowProcess};
use sluice_core::tuple;
use sluice_core::tuple::Tuple;
use sluice_core::value::Value;
use sluice_exec::{CoGroup, DuctState, ElementGraph, ExecError, GroupBy};
use sluice_io::{JsonlTap, Tap};
use sluice_operators::aggregate::{Count, Sum};
use sluice_operators::assertion::{AssertGroupSizeEquals, AssertNotNull};
use sluice_operators::buffer::FirstN;
use sluice_operators::join::InnerJoin;
use sluice_operators::{Function, Operation, OperationError, OperationKind, OperationResult, OutputCollector};

/// Parses its single string argument as an integer.
struct ParseNumber;

impl Operation for ParseNumber {
    fn name(&self) -> &str {
        "parse"
    }

    fn declared(&self) -> Fields {
        Fields::name("n")
    }
}

impl Function for ParseNumber {
    fn operate(
        &mut self,
        _process: &dyn FlowProcess,
        args: &EntryView<'_>,
        output: &mut dyn OutputCollector,
    ) -> OperationResult {
        let raw = args.get_str(0)?.unwrap_or_default();
        let n: i64 = raw
            .trim()
            .parse()
            .map_err(|_| OperationError::failed(format!("not a number: {raw}")))?;
        output.add(&tuple![n])
    }
}

fn raw_rows() -> Vec<Tuple> {
    vec![
        tuple![1i64, "10"],
        tuple![2i64, "20"],
        tuple![3i64, "x"],
        tuple![4i64, "40"],
        tuple![5i64, "50"],
    ]
}

fn parse_graph(trap: Option<Arc<dyn Tap>>) -> (ElementGraph, sluice_io::MemoryTap) {
    let mut graph = ElementGraph::new();
    let src = graph.source("src", source_tap("src", &["id", "raw"], raw_rows()));
    let parsed = graph
        .each(src, Fields::name("raw"), OperationKind::function(ParseNumber), Fields::all())
        .unwrap();
    let (out, sink) = sink_tap("out");
    graph.sink(parsed, sink).unwrap();
    if let Some(trap) = trap {
        graph.trap("src", trap);
    }
    (graph, out)
}

#[test]
fn failing_record_is_diverted_and_the_rest_flow_on() {
    let (trapped, trap) = sink_tap("trap");
    let (graph, out) = parse_graph(Some(trap));
    let process = execute(graph).unwrap();

    assert_eq!(
        out.tuples(),
        vec![
            tuple![1i64, "10", 10i64],
            tuple![2i64, "20", 20i64],
            tuple![4i64, "40", 40i64],
            tuple![5i64, "50", 50i64],
        ]
    );
    assert_eq!(trapped.tuples(), vec![tuple![3i64, "x"]]);
    assert_eq!(process.counter(&Counter::TuplesTrapped), 1);
    assert_eq!(process.counter(&Counter::TuplesRead), 5);
    assert_eq!(process.counter(&Counter::TuplesWritten), 4);
}

#[test]
fn untrapped_failure_stops_the_graph_and_still_cleans_up() {
    let (graph, out) = parse_graph(None);
    let (mut stream, _process) = build(graph, FlowConfig::default());
    let err = stream.execute().unwrap_err();
    match err {
        ExecError::Operation { element, source } => {
            assert_eq!(element, "each(parse)@src");
            assert!(matches!(source, OperationError::Failed(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(out.len(), 2);
    assert_eq!(stream.state_of("each(parse)@src"), Some(DuctState::Cleaned));
}

#[test]
fn traps_sharing_a_tap_share_one_collector() {
    let (trapped, trap) = sink_tap("trap");
    let mut graph = ElementGraph::new();
    for name in ["a", "b"] {
        let src = graph.source(name, source_tap(name, &["id", "raw"], vec![tuple![1i64, name]]));
        let parsed = graph
            .each(src, Fields::name("raw"), OperationKind::function(ParseNumber), Fields::all())
            .unwrap();
        let (_, sink) = sink_tap(&format!("out-{name}"));
        graph.sink(parsed, sink).unwrap();
        graph.trap(name, trap.clone());
    }
    let process = execute(graph).unwrap();

    assert_eq!(trapped.tuples(), vec![tuple![1i64, "a"], tuple![1i64, "b"]]);
    assert_eq!(process.counter(&Counter::TuplesTrapped), 2);
}

#[test]
fn repeated_execution_reproduces_every_output() {
    let mut graph = ElementGraph::new();
    let words = graph.source(
        "words",
        source_tap("words", &["word", "n"], vec![tuple!["a", 1i64], tuple!["b", 2i64], tuple!["a", 3i64]]),
    );
    let lookup = graph.source(
        "lookup",
        source_tap("lookup", &["key", "label"], vec![tuple!["a", "first"], tuple!["b", "second"]]),
    );
    let grouped = graph.group_by("by_word", &[words], GroupBy::new(Fields::name("word"))).unwrap();
    let counted = graph
        .every(grouped, Fields::all(), OperationKind::aggregator(Count::default()), Fields::all())
        .unwrap();
    let options = CoGroup::per_branch(vec![Fields::name("word"), Fields::name("key")], Arc::new(InnerJoin));
    let joined = graph.hash_join("labelled", &[counted, lookup], options).unwrap();
    let (out, sink) = sink_tap("out");
    graph.sink(joined, sink).unwrap();

    let (mut stream, process) = build(graph, FlowConfig::default());
    stream.execute().unwrap();
    let first = out.tuples();
    assert_eq!(
        first,
        vec![tuple!["a", 2i64, "a", "first"], tuple!["b", 1i64, "b", "second"]]
    );

    stream.execute().unwrap();
    assert_eq!(out.tuples(), first);
    assert_eq!(process.counter(&Counter::TuplesRead), 10);
}

#[test]
fn lifecycle_calls_out_of_order_are_rejected() {
    let (graph, out) = parse_graph(Some(sink_tap("trap").1));
    let (mut stream, _process) = build(graph, FlowConfig::default());
    assert_eq!(stream.state_of("HEAD"), Some(DuctState::Initialized));

    assert!(matches!(stream.run(), Err(ExecError::Lifecycle { .. })));
    stream.prepare().unwrap();
    assert!(matches!(stream.prepare(), Err(ExecError::Lifecycle { .. })));
    stream.run().unwrap();
    assert!(matches!(stream.run(), Err(ExecError::Lifecycle { .. })));
    stream.cleanup().unwrap();
    assert!(matches!(stream.run(), Err(ExecError::Lifecycle { .. })));
    assert_eq!(out.len(), 4);

    stream.execute().unwrap();
    assert_eq!(out.len(), 4);
}

#[test]
fn fork_feeds_every_branch() {
    let mut graph = ElementGraph::new();
    let src = graph.source("src", source_tap("src", &["id"], vec![tuple![1i64], tuple![2i64]]));
    let (left, left_sink) = sink_tap("left");
    let (right, right_sink) = sink_tap("right");
    graph.sink(src, left_sink).unwrap();
    graph.sink(src, right_sink).unwrap();

    let (mut stream, _) = build(graph, FlowConfig::default());
    assert!(stream.duct_names().iter().any(|n| n == "fork(source(src))"));
    stream.execute().unwrap();
    assert_eq!(left.tuples(), vec![tuple![1i64], tuple![2i64]]);
    assert_eq!(right.tuples(), left.tuples());
}

#[test]
fn merge_unions_branches_in_source_order() {
    let mut graph = ElementGraph::new();
    let a = graph.source("a", source_tap("a", &["id"], vec![tuple![1i64], tuple![2i64]]));
    let b = graph.source("b", source_tap("b", &["id"], vec![tuple![3i64]]));
    let merged = graph.merge("ab", &[a, b]).unwrap();
    let (out, sink) = sink_tap("out");
    graph.sink(merged, sink).unwrap();

    execute(graph).unwrap();
    assert_eq!(out.tuples(), vec![tuple![1i64], tuple![2i64], tuple![3i64]]);
}

#[test]
fn merge_rejects_branches_with_different_fields() {
    let mut graph = ElementGraph::new();
    let a = graph.source("a", source_tap("a", &["id"], Vec::new()));
    let b = graph.source("b", source_tap("b", &["key"], Vec::new()));
    assert!(matches!(graph.merge("ab", &[a, b]), Err(ExecError::Config(_))));
}

fn keyed_rows() -> Vec<Tuple> {
    vec![
        tuple!["b", 3i64],
        tuple!["a", 2i64],
        tuple!["b", 1i64],
        tuple!["a", 5i64],
        tuple!["a", 1i64],
    ]
}

fn grouped(options: GroupBy) -> Vec<Tuple> {
    let mut graph = ElementGraph::new();
    let src = graph.source("src", source_tap("src", &["k", "v"], keyed_rows()));
    let grouped = graph.group_by("by_k", &[src], options).unwrap();
    let (out, sink) = sink_tap("out");
    graph.sink(grouped, sink).unwrap();
    execute(graph).unwrap();
    out.tuples()
}

#[test]
fn secondary_sort_orders_values_within_each_group() {
    let k = Fields::name("k");
    let v = Fields::name("v");
    assert_eq!(
        grouped(GroupBy::new(k.clone()).sorted_by(v.clone(), false)),
        vec![
            tuple!["a", 1i64],
            tuple!["a", 2i64],
            tuple!["a", 5i64],
            tuple!["b", 1i64],
            tuple!["b", 3i64],
        ]
    );
    assert_eq!(
        grouped(GroupBy::new(k.clone()).sorted_by(v.clone(), true).reversed()),
        vec![
            tuple!["b", 3i64],
            tuple!["b", 1i64],
            tuple!["a", 5i64],
            tuple!["a", 2i64],
            tuple!["a", 1i64],
        ]
    );
    // without a sort, values keep arrival order
    assert_eq!(
        grouped(GroupBy::new(k)),
        vec![
            tuple!["a", 2i64],
            tuple!["a", 5i64],
            tuple!["a", 1i64],
            tuple!["b", 3i64],
            tuple!["b", 1i64],
        ]
    );
}

#[test]
fn chained_aggregators_extend_one_record_per_group() {
    let mut graph = ElementGraph::new();
    let src = graph.source(
        "words",
        source_tap("words", &["word", "n"], vec![tuple!["a", 1i64], tuple!["b", 2i64], tuple!["a", 3i64]]),
    );
    let grouped = graph.group_by("by_word", &[src], GroupBy::new(Fields::name("word"))).unwrap();
    let counted = graph
        .every(grouped, Fields::all(), OperationKind::aggregator(Count::default()), Fields::all())
        .unwrap();
    let summed = graph
        .every(counted, Fields::name("n"), OperationKind::aggregator(Sum::default()), Fields::all())
        .unwrap();
    assert_eq!(graph.scope(summed).unwrap().fields, fields(&["word", "count", "sum"]));
    let (out, sink) = sink_tap("out");
    graph.sink(summed, sink).unwrap();

    execute(graph).unwrap();
    assert_eq!(
        out.tuples(),
        vec![tuple!["a", 2i64, 4.0f64], tuple!["b", 1i64, 2.0f64]]
    );
}

#[test]
fn buffer_sees_sorted_groups() {
    let mut graph = ElementGraph::new();
    let src = graph.source("src", source_tap("src", &["k", "v"], keyed_rows()));
    let grouped = graph
        .group_by("by_k", &[src], GroupBy::new(Fields::name("k")).sorted_by(Fields::name("v"), true))
        .unwrap();
    let top = graph
        .every(grouped, Fields::all(), OperationKind::buffer(FirstN::new(2)), Fields::results())
        .unwrap();
    let (out, sink) = sink_tap("out");
    graph.sink(top, sink).unwrap();

    execute(graph).unwrap();
    assert_eq!(
        out.tuples(),
        vec![tuple!["a", 5i64], tuple!["a", 2i64], tuple!["b", 3i64], tuple!["b", 1i64]]
    );
}

#[test]
fn buffer_must_follow_its_splice() {
    let mut graph = ElementGraph::new();
    let src = graph.source("src", source_tap("src", &["k", "v"], Vec::new()));
    let grouped = graph.group_by("by_k", &[src], GroupBy::new(Fields::name("k"))).unwrap();
    let counted = graph
        .every(grouped, Fields::all(), OperationKind::aggregator(Count::default()), Fields::all())
        .unwrap();
    let misplaced = graph.every(counted, Fields::all(), OperationKind::buffer(FirstN::new(1)), Fields::results());
    assert!(matches!(misplaced, Err(ExecError::Config(_))));
}

fn not_null_graph(level: AssertionLevel, trap: Option<Arc<dyn Tap>>) -> (ElementGraph, sluice_io::MemoryTap) {
    let mut graph = ElementGraph::new();
    let src = graph.source(
        "src",
        source_tap("src", &["id"], vec![tuple![1i64], tuple![Value::Null], tuple![3i64]]),
    );
    let checked = graph
        .each(src, Fields::all(), OperationKind::value_assertion(level, AssertNotNull), Fields::all())
        .unwrap();
    let (out, sink) = sink_tap("out");
    graph.sink(checked, sink).unwrap();
    if let Some(trap) = trap {
        graph.trap("src", trap);
    }
    (graph, out)
}

#[test]
fn assertions_above_the_configured_level_are_skipped() {
    let valid = FlowConfig {
        assertion_level: AssertionLevel::Valid,
        ..FlowConfig::default()
    };
    let (graph, out) = not_null_graph(AssertionLevel::Strict, None);
    let (mut stream, _) = build(graph, valid);
    stream.execute().unwrap();
    assert_eq!(out.len(), 3);

    let (graph, out) = not_null_graph(AssertionLevel::None, None);
    execute(graph).unwrap();
    assert_eq!(out.len(), 3);
}

#[test]
fn failed_assertions_are_trapped_or_fail_the_run() {
    let (trapped, trap) = sink_tap("trap");
    let (graph, out) = not_null_graph(AssertionLevel::Valid, Some(trap));
    execute(graph).unwrap();
    assert_eq!(out.tuples(), vec![tuple![1i64], tuple![3i64]]);
    assert_eq!(trapped.tuples(), vec![tuple![Value::Null]]);

    let (graph, _) = not_null_graph(AssertionLevel::Strict, None);
    let err = execute(graph).unwrap_err();
    assert!(matches!(
        err,
        ExecError::Operation {
            source: OperationError::Assertion(_),
            ..
        }
    ));
}

#[test]
fn group_assertions_pass_the_key_chain_through() {
    let (trapped, trap) = sink_tap("trap");
    let mut graph = ElementGraph::new();
    let src = graph.source(
        "src",
        source_tap("src", &["k", "v"], vec![tuple!["a", 1i64], tuple!["a", 2i64], tuple!["b", 3i64]]),
    );
    let grouped = graph.group_by("by_k", &[src], GroupBy::new(Fields::name("k"))).unwrap();
    let checked = graph
        .every(
            grouped,
            Fields::all(),
            OperationKind::group_assertion(AssertionLevel::Valid, AssertGroupSizeEquals::new(2)),
            Fields::all(),
        )
        .unwrap();
    assert_eq!(graph.scope(checked).unwrap().fields, Fields::name("k"));
    let (out, sink) = sink_tap("out");
    graph.sink(checked, sink).unwrap();
    graph.trap("by_k", trap);

    execute(graph).unwrap();
    assert_eq!(out.tuples(), vec![tuple!["a"]]);
    assert_eq!(trapped.tuples(), vec![tuple!["b"]]);
}

#[test]
fn jsonl_taps_round_trip_through_a_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.jsonl");
    std::fs::write(&input, "{\"id\":1,\"raw\":\"7\"}\n\n{\"id\":2,\"raw\":\"8\"}\n").unwrap();
    let output = dir.path().join("out").join("parsed.jsonl");

    let mut graph = ElementGraph::new();
    let src = graph.source("src", Arc::new(JsonlTap::new(&input, fields(&["id", "raw"]))));
    let parsed = graph
        .each(src, Fields::name("raw"), OperationKind::function(ParseNumber), Fields::swap())
        .unwrap();
    assert_eq!(graph.scope(parsed).unwrap().fields, fields(&["id", "n"]));
    let sink = JsonlTap::new(&output, fields(&["id", "n"]));
    graph.sink(parsed, Arc::new(sink.clone())).unwrap();
    execute(graph).unwrap();

    let text = std::fs::read_to_string(&output).unwrap();
    assert_eq!(text, "{\"id\":1,\"n\":7}\n{\"id\":2,\"n\":8}\n");
    let mut rows = sink.open_for_read().unwrap();
    assert_eq!(rows.next_tuple().unwrap(), Some(tuple![1i64, 7i64]));
}
