//! Per-group reducers: aggregators and group assertions.
//!
//! Inside a window every value record travels down the whole Every chain
//! through `receive`. At `complete_group` each aggregator combines its
//! results with the key chain it was handed and passes the extended chain
//! on; the closing window turns the final chain into a plain record.

use std::sync::Arc;

use sluice_core::builder::{ArgumentsBuilder, OutgoingBuilder};
use sluice_core::config::{AssertionLevel, FlowConfig};
use sluice_core::entry::EntryView;
use sluice_core::fields::{resolve_arguments, resolve_declared, Fields};
use sluice_core::id::DuctId;
use sluice_core::process::FlowProcess;
use sluice_core::tuple::Row;
use sluice_operators::{
    Aggregator, GroupAssertion, OperationError, OperationKind, OperationResult, OutputCollector,
};

use super::{guarded, not_ready, process_of, settle, Wiring};
use crate::duct::{Duct, Flow, Grouping, Incoming, Links, PrepareContext};
use crate::error::{ExecError, ExecResult};
use crate::trap::TrapHandler;

enum EveryOperation {
    Aggregator(Box<dyn Aggregator>),
    Assertion(AssertionLevel, Box<dyn GroupAssertion>),
}

struct Built {
    arguments: Fields,
    args: ArgumentsBuilder,
    outgoing: Option<OutgoingBuilder>,
    skip: bool,
}

/// Fields an Every stage sees.
#[derive(Debug, Clone)]
pub struct EveryScope {
    /// The grouping key as the gate declared it.
    pub group: Fields,
    /// The key chain arriving at this stage.
    pub chain: Fields,
    /// Fields of the value records.
    pub values: Fields,
}

pub struct EveryStage {
    name: String,
    operation: EveryOperation,
    scope: EveryScope,
    argument_selector: Fields,
    output_selector: Fields,
    wiring: Option<Wiring>,
    built: Option<Built>,
    process: Option<Arc<dyn FlowProcess>>,
    trap: TrapHandler,
}

impl EveryStage {
    pub fn new(
        name: impl Into<String>,
        operation: OperationKind,
        scope: EveryScope,
        argument_selector: Fields,
        output_selector: Fields,
        trap: TrapHandler,
    ) -> ExecResult<Self> {
        let name = name.into();
        let operation = match operation {
            OperationKind::Aggregator(a) => EveryOperation::Aggregator(a),
            OperationKind::GroupAssertion(level, a) => EveryOperation::Assertion(level, a),
            other => {
                return Err(ExecError::config(format!(
                    "{name}: {other:?} cannot reduce a group"
                )))
            }
        };
        Ok(Self {
            name,
            operation,
            scope,
            argument_selector,
            output_selector,
            wiring: None,
            built: None,
            process: None,
            trap,
        })
    }
}

/// Extends the key chain with each aggregator result and completes the
/// group downstream before returning.
struct ChainForward<'f, 'g, 'a> {
    flow: &'f mut Flow<'g>,
    wiring: Wiring,
    outgoing: &'f OutgoingBuilder,
    chain: &'f dyn Row,
    group: Grouping<'a>,
    failure: Option<ExecError>,
}

impl OutputCollector for ChainForward<'_, '_, '_> {
    fn add(&mut self, row: &dyn Row) -> OperationResult {
        let out = self.outgoing.make_result(self.chain, row)?;
        match self
            .flow
            .complete_group(self.wiring.next, self.wiring.me, self.group, &out)
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.failure = Some(e);
                Err(OperationError::Downstream)
            }
        }
    }
}

impl Duct for EveryStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, links: &Links) -> ExecResult<()> {
        self.wiring = Some(Wiring::bind(&self.name, links)?);
        Ok(())
    }

    fn initialize(&mut self, config: &FlowConfig) -> ExecResult<()> {
        let arguments = resolve_arguments(&self.scope.values, &self.argument_selector)?;
        let args = ArgumentsBuilder::new(&self.scope.values, &self.argument_selector)?;
        let (outgoing, skip) = match &self.operation {
            EveryOperation::Aggregator(a) => {
                let declared = resolve_declared(&a.declared(), &arguments)?;
                let outgoing = OutgoingBuilder::new(&self.scope.chain, &arguments, &declared, &self.output_selector)?;
                (Some(outgoing), false)
            }
            EveryOperation::Assertion(level, _) => (None, !level.runs_under(config.assertion_level)),
        };
        self.built = Some(Built {
            arguments,
            args,
            outgoing,
            skip,
        });
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> ExecResult<()> {
        let process = ctx.process.clone();
        let result = match &mut self.operation {
            EveryOperation::Aggregator(a) => guarded(|| a.prepare(process.as_ref())),
            EveryOperation::Assertion(_, a) => guarded(|| a.prepare(process.as_ref())),
        };
        result.map_err(|e| ExecError::operation(&self.name, e))?;
        self.trap.prepare(ctx.traps, process.as_ref())?;
        self.process = Some(process);
        Ok(())
    }

    fn is_reducing(&self) -> bool {
        true
    }

    fn start(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "start"))?;
        flow.start(wiring.next, wiring.me)
    }

    fn start_group(&mut self, flow: &mut Flow<'_>, _from: DuctId, group: Grouping<'_>) -> ExecResult<()> {
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "start_group"))?;
        let built = self.built.as_ref().ok_or_else(|| not_ready(&self.name, "start_group"))?;
        let process = process_of(&self.name, &self.process)?;
        if !built.skip {
            let view = EntryView::new(&self.scope.group, group.key());
            let result = match &mut self.operation {
                EveryOperation::Aggregator(a) => guarded(|| a.start(process, &view)),
                EveryOperation::Assertion(_, a) => guarded(|| a.start(process, &view)),
            };
            settle(result, None, &self.trap, process, group.key())?;
        }
        flow.start_group(wiring.next, wiring.me, group)
    }

    fn receive(&mut self, flow: &mut Flow<'_>, _from: DuctId, incoming: Incoming<'_>) -> ExecResult<()> {
        let value = incoming.entry()?;
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "receive"))?;
        let built = self.built.as_ref().ok_or_else(|| not_ready(&self.name, "receive"))?;
        let process = process_of(&self.name, &self.process)?;
        if !built.skip {
            let args_row = built.args.make(value);
            let args = EntryView::new(&built.arguments, &args_row);
            let result = match &mut self.operation {
                EveryOperation::Aggregator(a) => guarded(|| a.aggregate(process, &args)),
                EveryOperation::Assertion(_, a) => guarded(|| a.aggregate(process, &args)),
            };
            settle(result, None, &self.trap, process, value)?;
        }
        flow.receive(wiring.next, wiring.me, incoming)
    }

    fn complete_group(
        &mut self,
        flow: &mut Flow<'_>,
        _from: DuctId,
        group: Grouping<'_>,
        chain: &dyn Row,
    ) -> ExecResult<()> {
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "complete_group"))?;
        let built = self.built.as_ref().ok_or_else(|| not_ready(&self.name, "complete_group"))?;
        let process = process_of(&self.name, &self.process)?;
        let view = EntryView::new(&self.scope.group, group.key());
        match &mut self.operation {
            EveryOperation::Aggregator(aggregator) => {
                let outgoing = built
                    .outgoing
                    .as_ref()
                    .ok_or_else(|| ExecError::invariant("aggregator stage without an outgoing builder"))?;
                let mut output = ChainForward {
                    flow,
                    wiring,
                    outgoing,
                    chain,
                    group,
                    failure: None,
                };
                let result = guarded(|| aggregator.complete(process, &view, &mut output));
                let failure = output.failure.take();
                settle(result, failure, &self.trap, process, chain)
            }
            EveryOperation::Assertion(_, assertion) => {
                if !built.skip {
                    if let Err(e) = guarded(|| assertion.complete(process, &view)) {
                        return self.trap.handle(process, e, chain);
                    }
                }
                flow.complete_group(wiring.next, wiring.me, group, chain)
            }
        }
    }

    fn complete(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "complete"))?;
        flow.complete(wiring.next, wiring.me)
    }

    fn cleanup(&mut self, process: &dyn FlowProcess) -> ExecResult<()> {
        self.trap.release();
        self.process = None;
        let result = match &mut self.operation {
            EveryOperation::Aggregator(a) => guarded(|| a.cleanup(process)),
            EveryOperation::Assertion(_, a) => guarded(|| a.cleanup(process)),
        };
        result.map_err(|e| ExecError::operation(&self.name, e))
    }
}
