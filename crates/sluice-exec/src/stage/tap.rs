//! Heads and tails of a stream: sources pull from a tap, sinks write to one.

use std::sync::Arc;

use sluice_core::fields::Fields;
use sluice_core::id::DuctId;
use sluice_core::process::{Counter, FlowProcess};
use sluice_io::{Tap, TupleCollector};

use super::{not_ready, Wiring};
use crate::duct::{Duct, Flow, Incoming, Links, PrepareContext};
use crate::error::{ExecError, ExecResult};

pub struct SourceStage {
    name: String,
    tap: Arc<dyn Tap>,
    wiring: Option<Wiring>,
    process: Option<Arc<dyn FlowProcess>>,
}

impl SourceStage {
    pub fn new(name: impl Into<String>, tap: Arc<dyn Tap>) -> Self {
        Self {
            name: name.into(),
            tap,
            wiring: None,
            process: None,
        }
    }
}

impl Duct for SourceStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, links: &Links) -> ExecResult<()> {
        self.wiring = Some(Wiring::bind(&self.name, links)?);
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> ExecResult<()> {
        self.process = Some(ctx.process.clone());
        Ok(())
    }

    fn start(&mut self, _flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        Ok(())
    }

    fn receive(&mut self, _flow: &mut Flow<'_>, _from: DuctId, _incoming: Incoming<'_>) -> ExecResult<()> {
        Err(ExecError::invariant(format!("{} is a head and takes no input", self.name)))
    }

    fn complete(&mut self, _flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        Ok(())
    }

    fn run(&mut self, flow: &mut Flow<'_>) -> ExecResult<()> {
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "run"))?;
        let process = self.process.clone().ok_or_else(|| not_ready(&self.name, "run"))?;
        tracing::debug!(source = %self.name, tap = self.tap.identifier(), "reading source");

        let mut iter = self.tap.open_for_read()?;
        flow.start(wiring.next, wiring.me)?;
        let mut read = 0i64;
        let pushed = loop {
            let tuple = match iter.next_tuple() {
                Ok(Some(t)) => t,
                Ok(None) => break Ok(()),
                Err(e) => break Err(ExecError::from(e)),
            };
            read += 1;
            process.increment(Counter::TuplesRead, 1);
            if let Err(e) = flow.receive(wiring.next, wiring.me, Incoming::Entry(&tuple)) {
                break Err(e);
            }
        };
        let closed = iter.close().map_err(ExecError::from);
        pushed?;
        closed?;
        tracing::debug!(source = %self.name, records = read, "source exhausted");
        flow.complete(wiring.next, wiring.me)
    }
}

pub struct SinkStage {
    name: String,
    tap: Arc<dyn Tap>,
    fields: Fields,
    output: Option<Box<dyn TupleCollector>>,
    process: Option<Arc<dyn FlowProcess>>,
}

impl SinkStage {
    /// `fields` are the fields of the records arriving at the sink.
    pub fn new(name: impl Into<String>, tap: Arc<dyn Tap>, fields: Fields) -> Self {
        Self {
            name: name.into(),
            tap,
            fields,
            output: None,
            process: None,
        }
    }
}

impl Duct for SinkStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, _links: &Links) -> ExecResult<()> {
        Ok(())
    }

    fn prepare(&mut self, ctx: &mut PrepareContext<'_>) -> ExecResult<()> {
        let fields = if self.fields.is_defined() {
            self.fields.clone()
        } else {
            self.tap.source_fields()
        };
        self.output = Some(self.tap.open_for_write(&fields)?);
        self.process = Some(ctx.process.clone());
        tracing::debug!(sink = %self.name, tap = self.tap.identifier(), "opened sink");
        Ok(())
    }

    fn start(&mut self, _flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        Ok(())
    }

    fn receive(&mut self, _flow: &mut Flow<'_>, _from: DuctId, incoming: Incoming<'_>) -> ExecResult<()> {
        let row = incoming.entry()?;
        let output = self.output.as_mut().ok_or_else(|| not_ready(&self.name, "receive"))?;
        output.add(row)?;
        if let Some(process) = &self.process {
            process.increment(Counter::TuplesWritten, 1);
        }
        Ok(())
    }

    fn complete(&mut self, _flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        Ok(())
    }

    fn cleanup(&mut self, _process: &dyn FlowProcess) -> ExecResult<()> {
        self.process = None;
        match self.output.take() {
            Some(mut output) => {
                output.close()?;
                tracing::debug!(sink = %self.name, "closed sink");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

/// Bounds the arena: the head runs every source in order, the tail swallows
/// the completions of every sink.
pub(crate) struct Sentinel {
    name: &'static str,
    succs: Vec<DuctId>,
}

impl Sentinel {
    pub fn head() -> Self {
        Self {
            name: "HEAD",
            succs: Vec::new(),
        }
    }

    pub fn tail() -> Self {
        Self {
            name: "TAIL",
            succs: Vec::new(),
        }
    }
}

impl Duct for Sentinel {
    fn name(&self) -> &str {
        self.name
    }

    fn bind(&mut self, links: &Links) -> ExecResult<()> {
        self.succs = links.succs.clone();
        Ok(())
    }

    fn start(&mut self, _flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        Ok(())
    }

    fn receive(&mut self, _flow: &mut Flow<'_>, _from: DuctId, _incoming: Incoming<'_>) -> ExecResult<()> {
        Ok(())
    }

    fn complete(&mut self, _flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        Ok(())
    }

    fn run(&mut self, flow: &mut Flow<'_>) -> ExecResult<()> {
        for &source in &self.succs {
            flow.run(source)?;
        }
        Ok(())
    }
}
