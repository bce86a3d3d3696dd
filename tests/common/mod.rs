//! Shared helpers for the integration tests.

#![allow(dead_code)] // not every test file uses every helper

use std::sync::Arc;

use sluice_core::config::FlowConfig;
use sluice_core::fields::Fields;
use sluice_core::tuple::Tuple;
use sluice_exec::{ElementGraph, ExecResult, LocalFlowProcess, StreamGraph};
use sluice_io::{MemoryTap, Tap};

pub fn fields(names: &[&str]) -> Fields {
    Fields::new(names.iter().copied()).unwrap()
}

/// A memory tap holding `rows`, named after its branch.
pub fn source_tap(name: &str, names: &[&str], rows: Vec<Tuple>) -> Arc<dyn Tap> {
    Arc::new(MemoryTap::with_tuples(name, fields(names), rows))
}

/// An empty memory tap; keep the returned handle to read what was written.
pub fn sink_tap(name: &str) -> (MemoryTap, Arc<dyn Tap>) {
    let tap = MemoryTap::new(name, Fields::unknown());
    let shared: Arc<dyn Tap> = Arc::new(tap.clone());
    (tap, shared)
}

pub fn build(graph: ElementGraph, config: FlowConfig) -> (StreamGraph, Arc<LocalFlowProcess>) {
    let process = Arc::new(LocalFlowProcess::new(config));
    let stream = StreamGraph::build(graph, process.clone()).unwrap();
    (stream, process)
}

/// Build with the default configuration and execute once.
pub fn execute(graph: ElementGraph) -> ExecResult<Arc<LocalFlowProcess>> {
    let (mut stream, process) = build(graph, FlowConfig::default());
    stream.execute()?;
    Ok(process)
}
