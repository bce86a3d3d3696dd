//! The push protocol every graph node speaks.
//!
//! Ducts live in an arena owned by the stream graph and reach their
//! neighbours only through [`Flow`], by id. A duct is taken out of its slot
//! for the duration of a call, so a cycle shows up as an invariant failure
//! instead of aliasing.

use std::fmt;
use std::sync::Arc;

use sluice_core::config::FlowConfig;
use sluice_core::id::DuctId;
use sluice_core::process::FlowProcess;
use sluice_core::tuple::{Row, Tuple};
use sluice_operators::JoinCursor;

use crate::error::{ExecError, ExecResult};
use crate::trap::TrapRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuctState {
    Unbound,
    Bound,
    Initialized,
    Prepared,
    Running,
    Cleaned,
}

impl fmt::Display for DuctState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DuctState::Unbound => "unbound",
            DuctState::Bound => "bound",
            DuctState::Initialized => "initialized",
            DuctState::Prepared => "prepared",
            DuctState::Running => "running",
            DuctState::Cleaned => "cleaned",
        };
        f.write_str(s)
    }
}

/// Rows of one group, re-iterable so a fork can replay them.
pub trait GroupValues {
    fn cursor(&self) -> Box<dyn JoinCursor + '_>;
}

/// One key and its values, pushed from a gate.
#[derive(Clone, Copy)]
pub struct Grouping<'a> {
    key: &'a Tuple,
    values: &'a dyn GroupValues,
}

impl<'a> Grouping<'a> {
    pub fn new(key: &'a Tuple, values: &'a dyn GroupValues) -> Self {
        Self { key, values }
    }

    pub fn key(&self) -> &'a Tuple {
        self.key
    }

    pub fn cursor(&self) -> Box<dyn JoinCursor + 'a> {
        self.values.cursor()
    }
}

impl fmt::Debug for Grouping<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Grouping").field("key", &self.key).finish()
    }
}

/// What travels along an edge.
#[derive(Clone, Copy)]
pub enum Incoming<'a> {
    Entry(&'a dyn Row),
    Grouping(Grouping<'a>),
}

impl<'a> Incoming<'a> {
    pub fn entry(&self) -> ExecResult<&'a dyn Row> {
        match self {
            Incoming::Entry(row) => Ok(*row),
            Incoming::Grouping(_) => Err(ExecError::invariant("expected a record, got a grouping")),
        }
    }

    pub fn grouping(&self) -> ExecResult<Grouping<'a>> {
        match self {
            Incoming::Grouping(g) => Ok(*g),
            Incoming::Entry(_) => Err(ExecError::invariant("expected a grouping, got a record")),
        }
    }
}

/// A duct's place in the topology, handed to `bind`.
#[derive(Debug, Clone)]
pub struct Links {
    pub me: DuctId,
    /// Predecessors with the branch ordinal of the edge and the number of
    /// completions that edge will deliver per run.
    pub preds: Vec<Pred>,
    pub succs: Vec<DuctId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pred {
    pub id: DuctId,
    pub ordinal: usize,
    pub paths: usize,
}

impl Links {
    /// The single successor of a linear duct.
    pub fn only_successor(&self, name: &str) -> ExecResult<DuctId> {
        match self.succs.as_slice() {
            [next] => Ok(*next),
            [] => Err(ExecError::config(format!("{name} has no successor"))),
            _ => Err(ExecError::config(format!(
                "{name} has {} successors; a fork is required",
                self.succs.len()
            ))),
        }
    }

    /// Completions expected per run across all incoming edges.
    pub fn incoming_paths(&self) -> usize {
        self.preds.iter().map(|p| p.paths).sum()
    }
}

/// Per-run resources handed to `prepare`.
pub struct PrepareContext<'a> {
    pub process: &'a Arc<dyn FlowProcess>,
    pub traps: &'a mut TrapRegistry,
}

pub trait Duct: Send {
    fn name(&self) -> &str;

    fn bind(&mut self, links: &Links) -> ExecResult<()>;

    /// Build fields and builders; pure.
    fn initialize(&mut self, _config: &FlowConfig) -> ExecResult<()> {
        Ok(())
    }

    fn prepare(&mut self, _ctx: &mut PrepareContext<'_>) -> ExecResult<()> {
        Ok(())
    }

    fn start(&mut self, flow: &mut Flow<'_>, from: DuctId) -> ExecResult<()>;

    fn receive(&mut self, flow: &mut Flow<'_>, from: DuctId, incoming: Incoming<'_>) -> ExecResult<()>;

    fn complete(&mut self, flow: &mut Flow<'_>, from: DuctId) -> ExecResult<()>;

    fn start_group(&mut self, _flow: &mut Flow<'_>, _from: DuctId, _group: Grouping<'_>) -> ExecResult<()> {
        Err(ExecError::invariant(format!("{} does not reduce groups", self.name())))
    }

    /// `chain` is the key record extended by every reducer before this one.
    fn complete_group(
        &mut self,
        _flow: &mut Flow<'_>,
        _from: DuctId,
        _group: Grouping<'_>,
        _chain: &dyn Row,
    ) -> ExecResult<()> {
        Err(ExecError::invariant(format!("{} does not reduce groups", self.name())))
    }

    /// Whether `start_group`/`complete_group` brackets are expected.
    fn is_reducing(&self) -> bool {
        false
    }

    /// Heads only: pull from the source and push downstream.
    fn run(&mut self, _flow: &mut Flow<'_>) -> ExecResult<()> {
        Err(ExecError::invariant(format!("{} is not a head", self.name())))
    }

    fn cleanup(&mut self, _process: &dyn FlowProcess) -> ExecResult<()> {
        Ok(())
    }
}

/// Call surface over the arena while the graph runs.
pub struct Flow<'g> {
    ducts: &'g mut [Option<Box<dyn Duct>>],
    states: &'g mut [DuctState],
    names: &'g [String],
}

impl<'g> Flow<'g> {
    pub(crate) fn new(
        ducts: &'g mut [Option<Box<dyn Duct>>],
        states: &'g mut [DuctState],
        names: &'g [String],
    ) -> Self {
        Self { ducts, states, names }
    }

    fn name_of(&self, id: DuctId) -> String {
        self.names.get(id.index()).cloned().unwrap_or_else(|| id.to_string())
    }

    fn expect_state(&mut self, to: DuctId, allowed: &[DuctState], next: DuctState, call: &str) -> ExecResult<()> {
        let state = *self
            .states
            .get(to.index())
            .ok_or_else(|| ExecError::invariant(format!("no duct {to}")))?;
        if !allowed.contains(&state) {
            return Err(ExecError::Lifecycle {
                duct: self.name_of(to),
                message: format!("{call} while {state}"),
            });
        }
        self.states[to.index()] = next;
        Ok(())
    }

    fn call<R>(
        &mut self,
        to: DuctId,
        f: impl FnOnce(&mut dyn Duct, &mut Flow<'_>) -> ExecResult<R>,
    ) -> ExecResult<R> {
        let slot = self
            .ducts
            .get_mut(to.index())
            .ok_or_else(|| ExecError::invariant(format!("no duct {to}")))?;
        let mut duct = slot
            .take()
            .ok_or_else(|| ExecError::invariant(format!("{to} re-entered while active")))?;
        let result = f(duct.as_mut(), self);
        self.ducts[to.index()] = Some(duct);
        result
    }

    pub fn run(&mut self, head: DuctId) -> ExecResult<()> {
        self.expect_state(head, &[DuctState::Prepared], DuctState::Running, "run")?;
        self.call(head, |d, flow| d.run(flow))
    }

    pub fn start(&mut self, to: DuctId, from: DuctId) -> ExecResult<()> {
        self.expect_state(to, &[DuctState::Prepared, DuctState::Running], DuctState::Running, "start")?;
        self.call(to, |d, flow| d.start(flow, from))
    }

    pub fn receive(&mut self, to: DuctId, from: DuctId, incoming: Incoming<'_>) -> ExecResult<()> {
        self.expect_state(to, &[DuctState::Running], DuctState::Running, "receive")?;
        self.call(to, |d, flow| d.receive(flow, from, incoming))
    }

    pub fn complete(&mut self, to: DuctId, from: DuctId) -> ExecResult<()> {
        self.expect_state(to, &[DuctState::Running], DuctState::Running, "complete")?;
        self.call(to, |d, flow| d.complete(flow, from))
    }

    pub fn start_group(&mut self, to: DuctId, from: DuctId, group: Grouping<'_>) -> ExecResult<()> {
        self.expect_state(to, &[DuctState::Running], DuctState::Running, "start_group")?;
        self.call(to, |d, flow| d.start_group(flow, from, group))
    }

    pub fn complete_group(
        &mut self,
        to: DuctId,
        from: DuctId,
        group: Grouping<'_>,
        chain: &dyn Row,
    ) -> ExecResult<()> {
        self.expect_state(to, &[DuctState::Running], DuctState::Running, "complete_group")?;
        self.call(to, |d, flow| d.complete_group(flow, from, group, chain))
    }
}
