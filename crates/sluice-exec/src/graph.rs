//! The stream graph: an element graph compiled into an arena of ducts.
//!
//! Building inserts the synthetic ducts the push protocol needs (forks,
//! windows, the HEAD and TAIL sentinels), counts the paths feeding every
//! gate and merge, decides between hash join and co-group, and orders the
//! heads. The graph then drives every duct through
//! `bind → initialize → prepare → run → cleanup`, and may be executed again
//! after cleanup.

use std::collections::BTreeSet;
use std::sync::Arc;

use sluice_core::fields::Fields;
use sluice_core::id::DuctId;
use sluice_core::process::FlowProcess;

use crate::duct::{Duct, DuctState, Flow, Links, Pred, PrepareContext};
use crate::element::{CoGroup, Element, ElementGraph, ElementKind, Scope, SourceOrder};
use crate::error::{ExecError, ExecResult};
use crate::fork::Fork;
use crate::gate::cogroup::SecondarySort;
use crate::gate::{CoGroupGate, HashJoinGate, SpliceBranch, SpliceSpec};
use crate::stage::tap::Sentinel;
use crate::stage::{BufferStage, EachStage, EveryStage, MergeStage, SinkStage, SourceStage};
use crate::stage::every::EveryScope;
use crate::trap::{TrapHandler, TrapRegistry};
use crate::window::{CloseWindow, OpenWindow};

/// What wiring needs to know about an element once its operation has been
/// moved into a duct.
#[derive(Debug, Clone)]
struct Shape {
    name: String,
    inputs: Vec<usize>,
    source: bool,
    sink: bool,
    splice: bool,
    collapses: bool,
    /// Aggregator or group assertion: emits key chains.
    reducer: bool,
    buffer: bool,
}

impl Shape {
    fn of(element: &Element) -> Self {
        Self {
            name: element.name.clone(),
            inputs: element.inputs.iter().map(|id| id.index()).collect(),
            source: matches!(element.kind, ElementKind::Source(_)),
            sink: matches!(element.kind, ElementKind::Sink(_)),
            splice: element.kind.is_splice(),
            collapses: element.kind.collapses_paths(),
            reducer: element.kind.is_every() && !element.kind.is_buffer(),
            buffer: element.kind.is_buffer(),
        }
    }

    /// Whether the successor sees groups rather than records.
    fn takes_groups(&self) -> bool {
        self.reducer || self.buffer
    }
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    from: DuctId,
    to: DuctId,
    ordinal: usize,
    paths: usize,
}

#[derive(Default)]
struct Arena {
    ducts: Vec<Box<dyn Duct>>,
    edges: Vec<Edge>,
}

impl Arena {
    fn add(&mut self, duct: Box<dyn Duct>) -> DuctId {
        self.ducts.push(duct);
        DuctId::from(self.ducts.len() - 1)
    }

    fn link(&mut self, from: DuctId, to: DuctId, ordinal: usize, paths: usize) {
        self.edges.push(Edge {
            from,
            to,
            ordinal,
            paths,
        });
    }

    fn links(&self, me: DuctId) -> Links {
        Links {
            me,
            preds: self
                .edges
                .iter()
                .filter(|e| e.to == me)
                .map(|e| Pred {
                    id: e.from,
                    ordinal: e.ordinal,
                    paths: e.paths,
                })
                .collect(),
            succs: self.edges.iter().filter(|e| e.from == me).map(|e| e.to).collect(),
        }
    }
}

pub struct StreamGraph {
    ducts: Vec<Option<Box<dyn Duct>>>,
    states: Vec<DuctState>,
    names: Vec<String>,
    head: DuctId,
    process: Arc<dyn FlowProcess>,
    traps: TrapRegistry,
}

impl StreamGraph {
    /// Compile `graph`, then bind and initialize every duct.
    pub fn build(graph: ElementGraph, process: Arc<dyn FlowProcess>) -> ExecResult<Self> {
        let (elements, traps, order) = graph.into_parts();
        let shapes: Vec<Shape> = elements.iter().map(Shape::of).collect();
        let scopes: Vec<Scope> = elements.iter().map(|e| e.scope.clone()).collect();
        let succs = successors(&shapes);
        validate(&shapes, &succs)?;
        let paths = path_counts(&shapes);
        let heads = upstream_heads(&shapes);

        let mut arena = Arena::default();
        let head = arena.add(Box::new(Sentinel::head()));
        let tail = arena.add(Box::new(Sentinel::tail()));

        let mut streamed_heads = BTreeSet::new();
        let mut buffered_heads = BTreeSet::new();
        let mut main = Vec::with_capacity(elements.len());
        for (i, element) in elements.into_iter().enumerate() {
            let shape = &shapes[i];
            let trap = TrapHandler::new(
                shape.name.clone(),
                Some(element.scope.branch.clone()),
                traps.get(&element.scope.branch).cloned(),
            );
            let input = |n: usize| {
                shape
                    .inputs
                    .get(n)
                    .map(|&j| &scopes[j])
                    .ok_or_else(|| ExecError::config(format!("{} has no input {n}", shape.name)))
            };
            let duct: Box<dyn Duct> = match element.kind {
                ElementKind::Source(tap) => Box::new(SourceStage::new(&shape.name, tap)),
                ElementKind::Sink(tap) => Box::new(SinkStage::new(&shape.name, tap, input(0)?.fields.clone())),
                ElementKind::Merge => Box::new(MergeStage::new(&shape.name)),
                ElementKind::Each {
                    operation,
                    arguments,
                    output,
                } => Box::new(EachStage::new(
                    &shape.name,
                    operation,
                    input(0)?.fields.clone(),
                    arguments,
                    output,
                    trap,
                )?),
                ElementKind::Every {
                    operation,
                    arguments,
                    output,
                } => {
                    let group = input(0)?.grouping.clone().ok_or_else(|| {
                        ExecError::config(format!("{} does not follow a grouping", shape.name))
                    })?;
                    if operation.is_buffer() {
                        Box::new(BufferStage::new(
                            &shape.name,
                            operation,
                            group.group,
                            group.values,
                            arguments,
                            output,
                            trap,
                        )?)
                    } else {
                        let scope = EveryScope {
                            group: group.group,
                            chain: group.chain,
                            values: group.values,
                        };
                        Box::new(EveryStage::new(&shape.name, operation, scope, arguments, output, trap)?)
                    }
                }
                ElementKind::GroupBy(options) => {
                    let spec = SpliceSpec {
                        name: shape.name.clone(),
                        branches: splice_branches(shape, &scopes, |_| Ok(options.grouping.clone()))?,
                        self_joins: 0,
                        reverse: options.reverse_order,
                        nulls_not_equal: false,
                    };
                    let sort = options.sorting.map(|sorting| SecondarySort {
                        sorting,
                        reverse: options.reverse_sort,
                    });
                    Box::new(CoGroupGate::group_by(spec, sort))
                }
                ElementKind::CoGroup(options) | ElementKind::HashJoin(options) if options.self_joins > 0 => {
                    let spec = joined_spec(shape, &scopes, &options)?;
                    Box::new(CoGroupGate::co_group(spec, options.joiner.clone()))
                }
                ElementKind::CoGroup(options) => {
                    let spec = joined_spec(shape, &scopes, &options)?;
                    Box::new(CoGroupGate::co_group(spec, options.joiner.clone()))
                }
                ElementKind::HashJoin(options) => {
                    let spec = joined_spec(shape, &scopes, &options)?;
                    let streamed = &heads[shape.inputs[0]];
                    let buffered: BTreeSet<usize> =
                        shape.inputs[1..].iter().flat_map(|&j| heads[j].iter().copied()).collect();
                    if streamed.len() > 1 || !streamed.is_disjoint(&buffered) {
                        tracing::debug!(
                            join = %shape.name,
                            streamed_heads = streamed.len(),
                            "streamed branch is not a single independent head; blocking co-group instead"
                        );
                        Box::new(CoGroupGate::co_group(spec, options.joiner.clone()))
                    } else {
                        streamed_heads.extend(streamed.iter().copied());
                        buffered_heads.extend(buffered);
                        Box::new(HashJoinGate::new(spec, options.joiner.clone()))
                    }
                }
            };
            main.push(arena.add(duct));
        }

        for (i, shape) in shapes.iter().enumerate() {
            wire(&mut arena, &shapes, &main, &succs[i], i, paths[i]);
            if shape.sink {
                arena.link(main[i], tail, 0, 1);
            }
        }
        let mut sources: Vec<usize> = (0..shapes.len()).filter(|&i| shapes[i].source).collect();
        if order == SourceOrder::BufferedFirst {
            sources.sort_by_key(|i| !(buffered_heads.contains(i) && !streamed_heads.contains(i)));
        }
        for &i in &sources {
            arena.link(head, main[i], 0, 1);
        }

        let mut names = Vec::with_capacity(arena.ducts.len());
        let mut ducts = Vec::with_capacity(arena.ducts.len());
        let links: Vec<Links> = (0..arena.ducts.len()).map(|d| arena.links(DuctId::from(d))).collect();
        for (mut duct, links) in std::mem::take(&mut arena.ducts).into_iter().zip(&links) {
            duct.bind(links)?;
            names.push(duct.name().to_string());
            ducts.push(Some(duct));
        }
        tracing::debug!(
            ducts = ducts.len(),
            sources = sources.len(),
            traps = traps.len(),
            "stream graph bound"
        );

        let mut graph = Self {
            states: vec![DuctState::Bound; ducts.len()],
            ducts,
            names,
            head,
            process,
            traps: TrapRegistry::new(),
        };
        graph.initialize()?;
        Ok(graph)
    }

    fn initialize(&mut self) -> ExecResult<()> {
        let config = self.process.config().clone();
        for (i, slot) in self.ducts.iter_mut().enumerate() {
            if let Some(duct) = slot {
                duct.initialize(&config)?;
                self.states[i] = DuctState::Initialized;
            }
        }
        Ok(())
    }

    pub fn process(&self) -> &Arc<dyn FlowProcess> {
        &self.process
    }

    /// Duct names in arena order.
    pub fn duct_names(&self) -> &[String] {
        &self.names
    }

    pub fn state_of(&self, name: &str) -> Option<DuctState> {
        self.names.iter().position(|n| n == name).map(|i| self.states[i])
    }

    pub fn prepare(&mut self) -> ExecResult<()> {
        for (i, slot) in self.ducts.iter_mut().enumerate() {
            let state = self.states[i];
            if !matches!(state, DuctState::Initialized | DuctState::Cleaned) {
                return Err(ExecError::Lifecycle {
                    duct: self.names[i].clone(),
                    message: format!("prepare while {state}"),
                });
            }
            let duct = slot
                .as_mut()
                .ok_or_else(|| ExecError::invariant(format!("{} is missing from the arena", self.names[i])))?;
            let mut ctx = PrepareContext {
                process: &self.process,
                traps: &mut self.traps,
            };
            duct.prepare(&mut ctx)?;
            self.states[i] = DuctState::Prepared;
        }
        tracing::debug!(traps = self.traps.len(), "stream graph prepared");
        Ok(())
    }

    /// Push every source through the graph.
    pub fn run(&mut self) -> ExecResult<()> {
        let mut flow = Flow::new(&mut self.ducts, &mut self.states, &self.names);
        flow.run(self.head)?;
        tracing::debug!("stream graph ran to completion");
        Ok(())
    }

    /// Clean every duct, then close the traps; the first failure is returned
    /// after all were tried.
    pub fn cleanup(&mut self) -> ExecResult<()> {
        let mut first: Option<ExecError> = None;
        for (i, slot) in self.ducts.iter_mut().enumerate() {
            if let Some(duct) = slot {
                if let Err(e) = duct.cleanup(self.process.as_ref()) {
                    tracing::warn!(duct = %self.names[i], error = %e, "cleanup failed");
                    first.get_or_insert(e);
                }
            }
            self.states[i] = DuctState::Cleaned;
        }
        if let Err(e) = self.traps.close_all() {
            first.get_or_insert(e);
        }
        first.map_or(Ok(()), Err)
    }

    /// Prepare, run and clean up; cleanup runs even when an earlier phase
    /// failed, and the earlier failure wins.
    pub fn execute(&mut self) -> ExecResult<()> {
        let result = self.prepare().and_then(|()| self.run());
        let cleaned = self.cleanup();
        result.and(cleaned)
    }
}

impl std::fmt::Debug for StreamGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamGraph")
            .field("ducts", &self.names)
            .field("states", &self.states)
            .finish()
    }
}

fn splice_branches(
    shape: &Shape,
    scopes: &[Scope],
    grouping: impl Fn(usize) -> ExecResult<Fields>,
) -> ExecResult<Vec<SpliceBranch>> {
    shape
        .inputs
        .iter()
        .enumerate()
        .map(|(n, &j)| {
            Ok(SpliceBranch {
                name: scopes[j].branch.clone(),
                fields: scopes[j].fields.clone(),
                grouping: grouping(n)?,
            })
        })
        .collect()
}

fn joined_spec(shape: &Shape, scopes: &[Scope], options: &CoGroup) -> ExecResult<SpliceSpec> {
    let branches = splice_branches(shape, scopes, |n| {
        options
            .grouping_of(n)
            .cloned()
            .ok_or_else(|| ExecError::config(format!("{}: no grouping for input {n}", shape.name)))
    })?;
    Ok(SpliceSpec {
        name: shape.name.clone(),
        branches,
        self_joins: options.self_joins,
        reverse: options.reverse_order,
        nulls_not_equal: options.nulls_not_equal,
    })
}

/// Successors of every element with the ordinal of the edge.
fn successors(shapes: &[Shape]) -> Vec<Vec<(usize, usize)>> {
    let mut succs = vec![Vec::new(); shapes.len()];
    for (j, shape) in shapes.iter().enumerate() {
        for (ordinal, &i) in shape.inputs.iter().enumerate() {
            succs[i].push((j, ordinal));
        }
    }
    succs
}

fn validate(shapes: &[Shape], succs: &[Vec<(usize, usize)>]) -> ExecResult<()> {
    if !shapes.iter().any(|s| s.source) {
        return Err(ExecError::config("the assembly has no source"));
    }
    for (i, shape) in shapes.iter().enumerate() {
        if let Some(&j) = shape.inputs.iter().find(|&&j| j >= i) {
            return Err(ExecError::config(format!(
                "{} reads from element {j}, which was not added before it",
                shape.name
            )));
        }
        if !shape.sink && succs[i].is_empty() {
            return Err(ExecError::config(format!("{} leads nowhere; add a sink", shape.name)));
        }
        if shape.reducer {
            let reducing = succs[i].iter().filter(|(j, _)| shapes[*j].reducer).count();
            if reducing != 0 && reducing != succs[i].len() {
                return Err(ExecError::config(format!(
                    "{} feeds both grouped and ungrouped successors",
                    shape.name
                )));
            }
        }
    }
    Ok(())
}

/// Completions each element delivers per run, counting root-to-element
/// paths and stopping at splices and merges, which collapse their fan-in.
fn path_counts(shapes: &[Shape]) -> Vec<usize> {
    let mut paths = vec![0usize; shapes.len()];
    for (i, shape) in shapes.iter().enumerate() {
        paths[i] = if shape.source {
            1
        } else {
            shape.inputs.iter().map(|&j| contribution(&shapes[j], paths[j])).sum()
        };
    }
    paths
}

fn contribution(pred: &Shape, paths: usize) -> usize {
    if pred.collapses {
        1
    } else {
        paths
    }
}

/// Sources upstream of every element.
fn upstream_heads(shapes: &[Shape]) -> Vec<BTreeSet<usize>> {
    let mut heads: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); shapes.len()];
    for (i, shape) in shapes.iter().enumerate() {
        if shape.source {
            heads[i].insert(i);
        }
        let upstream: BTreeSet<usize> = shape.inputs.iter().flat_map(|&j| heads[j].iter().copied()).collect();
        heads[i].extend(upstream);
    }
    heads
}

/// Link element `i`'s duct to its successors, inserting the closing window,
/// fork and opening windows its position calls for.
fn wire(
    arena: &mut Arena,
    shapes: &[Shape],
    main: &[DuctId],
    succs: &[(usize, usize)],
    i: usize,
    paths: usize,
) {
    let shape = &shapes[i];
    let me = main[i];
    let out = contribution(shape, paths);
    let mut exit = me;

    if shape.reducer && succs.iter().all(|(j, _)| !shapes[*j].reducer) {
        let close = arena.add(Box::new(CloseWindow::new(format!("close({})", shape.name))));
        arena.link(exit, close, 0, out);
        exit = close;
    }
    if succs.len() > 1 {
        let fork = arena.add(Box::new(Fork::new(format!("fork({})", shape.name))));
        arena.link(exit, fork, 0, out);
        exit = fork;
    }
    for &(j, ordinal) in succs {
        let next = main[j];
        if shape.splice && !shapes[j].buffer {
            let window = OpenWindow::new(format!("open({}->{})", shape.name, shapes[j].name), shapes[j].takes_groups());
            let window = arena.add(Box::new(window));
            arena.link(exit, window, 0, out);
            arena.link(window, next, ordinal, out);
        } else {
            arena.link(exit, next, ordinal, out);
        }
    }
}
