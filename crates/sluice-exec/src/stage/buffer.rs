//! Buffers see a whole group through a cursor and emit freely.

use std::sync::Arc;

use sluice_core::builder::{ArgumentsBuilder, OutgoingBuilder};
use sluice_core::config::FlowConfig;
use sluice_core::entry::EntryView;
use sluice_core::fields::{resolve_arguments, resolve_declared, Fields};
use sluice_core::id::DuctId;
use sluice_core::process::FlowProcess;
use sluice_core::tuple::{Row, Tuple};
use sluice_operators::{
    Buffer, BufferCall, BufferContext, JoinCursor, OperationError, OperationKind, OperationResult,
};

use super::{guarded, not_ready, process_of, settle, Forward, Wiring};
use crate::duct::{Duct, Flow, Incoming, Links, PrepareContext};
use crate::error::{ExecError, ExecResult};
use crate::trap::TrapHandler;

struct Built {
    arguments: Fields,
    args: ArgumentsBuilder,
    outgoing: OutgoingBuilder,
    /// Stands in for the value record when emitting outside an advance.
    null_value: Tuple,
}

pub struct BufferStage {
    name: String,
    buffer: Box<dyn Buffer>,
    group_fields: Fields,
    values: Fields,
    argument_selector: Fields,
    output_selector: Fields,
    wiring: Option<Wiring>,
    built: Option<Built>,
    process: Option<Arc<dyn FlowProcess>>,
    trap: TrapHandler,
    /// Reused across groups for the current arguments.
    current: Tuple,
}

impl BufferStage {
    pub fn new(
        name: impl Into<String>,
        operation: OperationKind,
        group_fields: Fields,
        values: Fields,
        argument_selector: Fields,
        output_selector: Fields,
        trap: TrapHandler,
    ) -> ExecResult<Self> {
        let name = name.into();
        let buffer = match operation {
            OperationKind::Buffer(buffer) => buffer,
            other => return Err(ExecError::config(format!("{name}: {other:?} is not a buffer"))),
        };
        Ok(Self {
            name,
            buffer,
            group_fields,
            values,
            argument_selector,
            output_selector,
            wiring: None,
            built: None,
            process: None,
            trap,
            current: Tuple::new(),
        })
    }
}

/// The buffer's window onto one group.
struct BufferRun<'f, 'g, 'c> {
    flow: &'f mut Flow<'g>,
    wiring: Wiring,
    built: &'f Built,
    group_fields: &'f Fields,
    key: &'c Tuple,
    cursor: Box<dyn JoinCursor + 'c>,
    positioned: bool,
    current: &'f mut Tuple,
    failure: Option<ExecError>,
}

impl BufferContext for BufferRun<'_, '_, '_> {
    fn group(&self) -> EntryView<'_> {
        EntryView::new(self.group_fields, self.key)
    }

    fn advance(&mut self) -> OperationResult<bool> {
        self.positioned = self.cursor.advance();
        if self.positioned {
            let args = self.built.args.make(self.cursor.row());
            self.current.set_all(&args)?;
        }
        Ok(self.positioned)
    }

    fn arguments(&self) -> Option<EntryView<'_>> {
        self.positioned
            .then(|| EntryView::new(&self.built.arguments, &*self.current))
    }

    fn emit(&mut self, row: &dyn Row) -> OperationResult {
        let value: &dyn Row = if self.positioned {
            self.cursor.row()
        } else {
            &self.built.null_value
        };
        let out = self.built.outgoing.make_result(value, row)?;
        match self
            .flow
            .receive(self.wiring.next, self.wiring.me, Incoming::Entry(&out))
        {
            Ok(()) => Ok(()),
            Err(e) => {
                self.failure = Some(e);
                Err(OperationError::Downstream)
            }
        }
    }
}

impl Duct for BufferStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, links: &Links) -> ExecResult<()> {
        self.wiring = Some(Wiring::bind(&self.name, links)?);
        Ok(())
    }

    fn initialize(&mut self, _config: &FlowConfig) -> ExecResult<()> {
        let arguments = resolve_arguments(&self.values, &self.argument_selector)?;
        let args = ArgumentsBuilder::new(&self.values, &self.argument_selector)?;
        let declared = resolve_declared(&self.buffer.declared(), &arguments)?;
        let outgoing = OutgoingBuilder::new(&self.values, &arguments, &declared, &self.output_selector)?;
        let null_value = if self.values.is_sized() {
            Tuple::nulls(self.values.size())
        } else {
            Tuple::new()
        };
        self.built = Some(Built {
            arguments,
            args,
            outgoing,
            null_value,
        });
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> ExecResult<()> {
        let process = ctx.process.clone();
        let buffer = &mut self.buffer;
        guarded(|| buffer.prepare(process.as_ref())).map_err(|e| ExecError::operation(&self.name, e))?;
        self.trap.prepare(ctx.traps, process.as_ref())?;
        self.process = Some(process);
        Ok(())
    }

    fn start(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "start"))?;
        flow.start(wiring.next, wiring.me)
    }

    fn receive(&mut self, flow: &mut Flow<'_>, _from: DuctId, incoming: Incoming<'_>) -> ExecResult<()> {
        let group = incoming.grouping()?;
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "receive"))?;
        let built = self.built.as_ref().ok_or_else(|| not_ready(&self.name, "receive"))?;
        let process = process_of(&self.name, &self.process)?;

        let mut run = BufferRun {
            flow,
            wiring,
            built,
            group_fields: &self.group_fields,
            key: group.key(),
            cursor: group.cursor(),
            positioned: false,
            current: &mut self.current,
            failure: None,
        };
        let buffer = &mut self.buffer;
        let result = guarded(|| buffer.operate(process, &mut BufferCall::new(&mut run)));
        let failure = run.failure.take();
        let record: &dyn Row = if run.positioned { &*run.current } else { group.key() };
        settle(result, failure, &self.trap, process, record)
    }

    fn complete(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "complete"))?;
        let flushed = match (self.built.as_ref(), self.process.as_deref()) {
            (Some(built), Some(process)) => {
                let mut output = Forward::new(flow, wiring, &built.outgoing, &built.null_value);
                let buffer = &mut self.buffer;
                let result = guarded(|| buffer.flush(process, &mut output));
                let failure = output.failure.take();
                settle(result, failure, &self.trap, process, &built.null_value)
            }
            _ => Ok(()),
        };
        let completed = flow.complete(wiring.next, wiring.me);
        flushed.and(completed)
    }

    fn cleanup(&mut self, process: &dyn FlowProcess) -> ExecResult<()> {
        self.trap.release();
        self.process = None;
        let buffer = &mut self.buffer;
        guarded(|| buffer.cleanup(process)).map_err(|e| ExecError::operation(&self.name, e))
    }
}
