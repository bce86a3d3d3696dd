//! Operation contracts.
//!
//! The exec crate wraps each operation in a stage chosen once from its
//! [`OperationKind`]; stages call `prepare` once per run, then the
//! kind-specific methods per record or group, then `flush` and `cleanup`.
//!
//! Every call receives the task's [`FlowProcess`] for configuration and
//! counters. Operations only ever see their arguments, never the full record.

use sluice_core::config::AssertionLevel;
use sluice_core::entry::EntryView;
use sluice_core::fields::Fields;
use sluice_core::process::FlowProcess;
use sluice_core::tuple::Row;

use crate::error::OperationResult;

/// Receives the rows an operation emits.
pub trait OutputCollector {
    fn add(&mut self, row: &dyn Row) -> OperationResult;
}

/// Collects into a vector; handy for operations that emit in `flush`.
impl OutputCollector for Vec<sluice_core::tuple::Tuple> {
    fn add(&mut self, row: &dyn Row) -> OperationResult {
        self.push(row.to_tuple());
        Ok(())
    }
}

pub trait Operation: Send {
    /// Human-readable operation name (stable).
    fn name(&self) -> &str;

    /// Fields this operation emits. `Fields::args()` means "same as the
    /// arguments"; `Fields::unknown()` defers to the actual output.
    fn declared(&self) -> Fields {
        Fields::unknown()
    }

    fn prepare(&mut self, _process: &dyn FlowProcess) -> OperationResult {
        Ok(())
    }

    /// Called once after the last record of a run.
    fn flush(&mut self, _process: &dyn FlowProcess, _output: &mut dyn OutputCollector) -> OperationResult {
        Ok(())
    }

    fn cleanup(&mut self, _process: &dyn FlowProcess) -> OperationResult {
        Ok(())
    }
}

/// Zero or more results per argument record, emitted synchronously.
pub trait Function: Operation {
    fn operate(
        &mut self,
        process: &dyn FlowProcess,
        args: &EntryView<'_>,
        output: &mut dyn OutputCollector,
    ) -> OperationResult;
}

pub trait Filter: Operation {
    /// `true` drops the record.
    fn is_remove(&mut self, process: &dyn FlowProcess, args: &EntryView<'_>) -> OperationResult<bool>;
}

/// Folds a group's argument records into results emitted at group end.
pub trait Aggregator: Operation {
    fn start(&mut self, process: &dyn FlowProcess, group: &EntryView<'_>) -> OperationResult;

    fn aggregate(&mut self, process: &dyn FlowProcess, args: &EntryView<'_>) -> OperationResult;

    fn complete(
        &mut self,
        process: &dyn FlowProcess,
        group: &EntryView<'_>,
        output: &mut dyn OutputCollector,
    ) -> OperationResult;
}

/// Implemented by the buffer stage; see [`BufferCall`].
pub trait BufferContext {
    fn group(&self) -> EntryView<'_>;

    /// Move to the next value record of the group.
    fn advance(&mut self) -> OperationResult<bool>;

    /// Arguments of the current value record.
    fn arguments(&self) -> Option<EntryView<'_>>;

    /// Emit a result; it is combined with the current value record.
    fn emit(&mut self, row: &dyn Row) -> OperationResult;
}

/// Handed to [`Buffer::operate`] once per group.
pub struct BufferCall<'c> {
    ctx: &'c mut dyn BufferContext,
}

impl<'c> BufferCall<'c> {
    pub fn new(ctx: &'c mut dyn BufferContext) -> Self {
        Self { ctx }
    }

    pub fn group(&self) -> EntryView<'_> {
        self.ctx.group()
    }

    pub fn advance(&mut self) -> OperationResult<bool> {
        self.ctx.advance()
    }

    pub fn arguments(&self) -> Option<EntryView<'_>> {
        self.ctx.arguments()
    }

    pub fn emit(&mut self, row: &dyn Row) -> OperationResult {
        self.ctx.emit(row)
    }
}

/// Sees a whole group at once and emits any number of results.
pub trait Buffer: Operation {
    fn operate(&mut self, process: &dyn FlowProcess, call: &mut BufferCall<'_>) -> OperationResult;
}

/// Checks each record; fails with `OperationError::Assertion`.
pub trait ValueAssertion: Operation {
    fn check(&mut self, process: &dyn FlowProcess, args: &EntryView<'_>) -> OperationResult;
}

/// Checks each group; fails with `OperationError::Assertion` from `complete`.
pub trait GroupAssertion: Operation {
    fn start(&mut self, process: &dyn FlowProcess, group: &EntryView<'_>) -> OperationResult;

    fn aggregate(&mut self, process: &dyn FlowProcess, args: &EntryView<'_>) -> OperationResult;

    fn complete(&mut self, process: &dyn FlowProcess, group: &EntryView<'_>) -> OperationResult;
}

/// Closed set of operation kinds; matched once when the graph is built.
pub enum OperationKind {
    Function(Box<dyn Function>),
    Filter(Box<dyn Filter>),
    Aggregator(Box<dyn Aggregator>),
    Buffer(Box<dyn Buffer>),
    ValueAssertion(AssertionLevel, Box<dyn ValueAssertion>),
    GroupAssertion(AssertionLevel, Box<dyn GroupAssertion>),
}

impl OperationKind {
    pub fn function(f: impl Function + 'static) -> Self {
        OperationKind::Function(Box::new(f))
    }

    pub fn filter(f: impl Filter + 'static) -> Self {
        OperationKind::Filter(Box::new(f))
    }

    pub fn aggregator(a: impl Aggregator + 'static) -> Self {
        OperationKind::Aggregator(Box::new(a))
    }

    pub fn buffer(b: impl Buffer + 'static) -> Self {
        OperationKind::Buffer(Box::new(b))
    }

    pub fn value_assertion(level: AssertionLevel, a: impl ValueAssertion + 'static) -> Self {
        OperationKind::ValueAssertion(level, Box::new(a))
    }

    pub fn group_assertion(level: AssertionLevel, a: impl GroupAssertion + 'static) -> Self {
        OperationKind::GroupAssertion(level, Box::new(a))
    }

    pub fn name(&self) -> &str {
        match self {
            OperationKind::Function(o) => o.name(),
            OperationKind::Filter(o) => o.name(),
            OperationKind::Aggregator(o) => o.name(),
            OperationKind::Buffer(o) => o.name(),
            OperationKind::ValueAssertion(_, o) => o.name(),
            OperationKind::GroupAssertion(_, o) => o.name(),
        }
    }

    /// Declared output fields; filters and assertions pass records through.
    pub fn declared(&self) -> Fields {
        match self {
            OperationKind::Function(o) => o.declared(),
            OperationKind::Aggregator(o) => o.declared(),
            OperationKind::Buffer(o) => o.declared(),
            OperationKind::Filter(_) | OperationKind::ValueAssertion(..) | OperationKind::GroupAssertion(..) => {
                Fields::all()
            }
        }
    }

    /// Runs per record outside a grouping.
    pub fn is_each(&self) -> bool {
        matches!(
            self,
            OperationKind::Function(_) | OperationKind::Filter(_) | OperationKind::ValueAssertion(..)
        )
    }

    /// Runs per group after a gate.
    pub fn is_every(&self) -> bool {
        !self.is_each()
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, OperationKind::Buffer(_))
    }

    /// Passes records through unchanged.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            OperationKind::Filter(_) | OperationKind::ValueAssertion(..) | OperationKind::GroupAssertion(..)
        )
    }

    pub fn assertion_level(&self) -> Option<AssertionLevel> {
        match self {
            OperationKind::ValueAssertion(level, _) | OperationKind::GroupAssertion(level, _) => Some(*level),
            _ => None,
        }
    }
}

impl std::fmt::Debug for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            OperationKind::Function(_) => "Function",
            OperationKind::Filter(_) => "Filter",
            OperationKind::Aggregator(_) => "Aggregator",
            OperationKind::Buffer(_) => "Buffer",
            OperationKind::ValueAssertion(..) => "ValueAssertion",
            OperationKind::GroupAssertion(..) => "GroupAssertion",
        };
        write!(f, "{kind}({})", self.name())
    }
}
