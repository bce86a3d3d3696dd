//! Per-record operations: functions, filters and value assertions.

use std::sync::Arc;

use sluice_core::builder::{ArgumentsBuilder, OutgoingBuilder};
use sluice_core::config::{AssertionLevel, FlowConfig};
use sluice_core::entry::EntryView;
use sluice_core::fields::{resolve_arguments, resolve_declared, Fields};
use sluice_core::id::DuctId;
use sluice_core::process::FlowProcess;
use sluice_core::tuple::Tuple;
use sluice_operators::{Filter, Function, OperationKind, ValueAssertion};

use super::{guarded, not_ready, process_of, settle, Forward, Wiring};
use crate::duct::{Duct, Flow, Incoming, Links, PrepareContext};
use crate::error::{ExecError, ExecResult};
use crate::trap::TrapHandler;

enum EachOperation {
    Function(Box<dyn Function>),
    Filter(Box<dyn Filter>),
    Assertion(AssertionLevel, Box<dyn ValueAssertion>),
}

struct Built {
    arguments: Fields,
    args: ArgumentsBuilder,
    /// Functions only; filters and assertions pass the input through.
    outgoing: Option<OutgoingBuilder>,
    /// Input for results emitted by `flush`.
    flush_input: Tuple,
    skip: bool,
}

pub struct EachStage {
    name: String,
    operation: EachOperation,
    incoming: Fields,
    argument_selector: Fields,
    output_selector: Fields,
    wiring: Option<Wiring>,
    built: Option<Built>,
    process: Option<Arc<dyn FlowProcess>>,
    trap: TrapHandler,
}

impl EachStage {
    pub fn new(
        name: impl Into<String>,
        operation: OperationKind,
        incoming: Fields,
        argument_selector: Fields,
        output_selector: Fields,
        trap: TrapHandler,
    ) -> ExecResult<Self> {
        let name = name.into();
        let operation = match operation {
            OperationKind::Function(f) => EachOperation::Function(f),
            OperationKind::Filter(f) => EachOperation::Filter(f),
            OperationKind::ValueAssertion(level, a) => EachOperation::Assertion(level, a),
            other => {
                return Err(ExecError::config(format!(
                    "{name}: {other:?} cannot run per record"
                )))
            }
        };
        Ok(Self {
            name,
            operation,
            incoming,
            argument_selector,
            output_selector,
            wiring: None,
            built: None,
            process: None,
            trap,
        })
    }

    fn declared(&self) -> Fields {
        match &self.operation {
            EachOperation::Function(f) => f.declared(),
            EachOperation::Filter(_) | EachOperation::Assertion(..) => Fields::all(),
        }
    }
}

impl Duct for EachStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, links: &Links) -> ExecResult<()> {
        self.wiring = Some(Wiring::bind(&self.name, links)?);
        Ok(())
    }

    fn initialize(&mut self, config: &FlowConfig) -> ExecResult<()> {
        let arguments = resolve_arguments(&self.incoming, &self.argument_selector)?;
        let args = ArgumentsBuilder::new(&self.incoming, &self.argument_selector)?;
        let outgoing = match &self.operation {
            EachOperation::Function(_) => {
                let declared = resolve_declared(&self.declared(), &arguments)?;
                Some(OutgoingBuilder::new(
                    &self.incoming,
                    &arguments,
                    &declared,
                    &self.output_selector,
                )?)
            }
            _ => None,
        };
        let skip = match &self.operation {
            EachOperation::Assertion(level, _) => !level.runs_under(config.assertion_level),
            _ => false,
        };
        let flush_input = if self.incoming.is_sized() {
            Tuple::nulls(self.incoming.size())
        } else {
            Tuple::new()
        };
        self.built = Some(Built {
            arguments,
            args,
            outgoing,
            flush_input,
            skip,
        });
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> ExecResult<()> {
        let process = ctx.process.clone();
        let result = match &mut self.operation {
            EachOperation::Function(f) => guarded(|| f.prepare(process.as_ref())),
            EachOperation::Filter(f) => guarded(|| f.prepare(process.as_ref())),
            EachOperation::Assertion(_, a) => guarded(|| a.prepare(process.as_ref())),
        };
        result.map_err(|e| ExecError::operation(&self.name, e))?;
        self.trap.prepare(ctx.traps, process.as_ref())?;
        self.process = Some(process);
        Ok(())
    }

    fn start(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "start"))?;
        flow.start(wiring.next, wiring.me)
    }

    fn receive(&mut self, flow: &mut Flow<'_>, _from: DuctId, incoming: Incoming<'_>) -> ExecResult<()> {
        let input = incoming.entry()?;
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "receive"))?;
        let built = self.built.as_ref().ok_or_else(|| not_ready(&self.name, "receive"))?;
        let process = process_of(&self.name, &self.process)?;

        if built.skip {
            return flow.receive(wiring.next, wiring.me, incoming);
        }

        let args_row = built.args.make(input);
        let args = EntryView::new(&built.arguments, &args_row);

        match &mut self.operation {
            EachOperation::Function(function) => {
                let outgoing = built
                    .outgoing
                    .as_ref()
                    .ok_or_else(|| ExecError::invariant("function stage without an outgoing builder"))?;
                let mut output = Forward::new(flow, wiring, outgoing, input);
                let result = guarded(|| function.operate(process, &args, &mut output));
                let failure = output.failure.take();
                settle(result, failure, &self.trap, process, input)
            }
            EachOperation::Filter(filter) => match guarded(|| filter.is_remove(process, &args)) {
                Ok(true) => Ok(()),
                Ok(false) => flow.receive(wiring.next, wiring.me, incoming),
                Err(e) => self.trap.handle(process, e, input),
            },
            EachOperation::Assertion(_, assertion) => match guarded(|| assertion.check(process, &args)) {
                Ok(()) => flow.receive(wiring.next, wiring.me, incoming),
                Err(e) => self.trap.handle(process, e, input),
            },
        }
    }

    fn complete(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "complete"))?;
        let flushed = match (&mut self.operation, self.built.as_ref(), self.process.as_deref()) {
            (EachOperation::Function(function), Some(built), Some(process)) => match &built.outgoing {
                Some(outgoing) => {
                    let mut output = Forward::new(flow, wiring, outgoing, &built.flush_input);
                    let result = guarded(|| function.flush(process, &mut output));
                    let failure = output.failure.take();
                    settle(result, failure, &self.trap, process, &built.flush_input)
                }
                None => Ok(()),
            },
            _ => Ok(()),
        };
        let completed = flow.complete(wiring.next, wiring.me);
        flushed.and(completed)
    }

    fn cleanup(&mut self, process: &dyn FlowProcess) -> ExecResult<()> {
        self.trap.release();
        self.process = None;
        let result = match &mut self.operation {
            EachOperation::Function(f) => guarded(|| f.cleanup(process)),
            EachOperation::Filter(f) => guarded(|| f.cleanup(process)),
            EachOperation::Assertion(_, a) => guarded(|| a.cleanup(process)),
        };
        result.map_err(|e| ExecError::operation(&self.name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_operators::filter::PredicateFilter;
    use sluice_operators::function::Identity;

    #[test]
    fn rejects_grouped_operations() {
        let err = EachStage::new(
            "each(count)",
            OperationKind::aggregator(sluice_operators::aggregate::Count::default()),
            Fields::name("a"),
            Fields::all(),
            Fields::results(),
            TrapHandler::untrapped("each(count)"),
        );
        assert!(matches!(err, Err(ExecError::Config(_))));
    }

    #[test]
    fn initialize_resolves_builders() {
        let mut stage = EachStage::new(
            "each(identity)",
            OperationKind::function(Identity::renamed(Fields::name("b"))),
            Fields::new(["a", "x"]).unwrap(),
            Fields::name("a"),
            Fields::all(),
            TrapHandler::untrapped("each(identity)"),
        )
        .unwrap();
        stage.initialize(&FlowConfig::default()).unwrap();
        let built = stage.built.as_ref().unwrap();
        assert!(matches!(built.outgoing, Some(OutgoingBuilder::Composite(_))));
        assert_eq!(built.arguments, Fields::name("a"));
    }

    #[test]
    fn assertion_level_decides_skip() {
        let config = FlowConfig {
            assertion_level: AssertionLevel::Valid,
            ..FlowConfig::default()
        };
        let mut stage = EachStage::new(
            "assert",
            OperationKind::value_assertion(AssertionLevel::Strict, sluice_operators::assertion::AssertNotNull),
            Fields::name("a"),
            Fields::all(),
            Fields::results(),
            TrapHandler::untrapped("assert"),
        )
        .unwrap();
        stage.initialize(&config).unwrap();
        assert!(stage.built.as_ref().unwrap().skip);

        let mut filter = EachStage::new(
            "filter",
            OperationKind::filter(PredicateFilter::new("a > 1")),
            Fields::name("a"),
            Fields::all(),
            Fields::all(),
            TrapHandler::untrapped("filter"),
        )
        .unwrap();
        filter.initialize(&config).unwrap();
        assert!(!filter.built.as_ref().unwrap().skip);
    }
}
