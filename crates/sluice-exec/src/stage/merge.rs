//! Unordered union of several branches with identical fields.

use sluice_core::id::DuctId;

use super::{not_ready, Wiring};
use crate::countdown::Countdown;
use crate::duct::{Duct, Flow, Incoming, Links, PrepareContext};
use crate::error::ExecResult;

pub struct MergeStage {
    name: String,
    wiring: Option<Wiring>,
    started: bool,
    remaining: Countdown,
}

impl MergeStage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wiring: None,
            started: false,
            remaining: Countdown::new(0),
        }
    }
}

impl Duct for MergeStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, links: &Links) -> ExecResult<()> {
        self.wiring = Some(Wiring::bind(&self.name, links)?);
        self.remaining = Countdown::new(links.incoming_paths());
        Ok(())
    }

    fn prepare(&mut self, _ctx: &mut PrepareContext<'_>) -> ExecResult<()> {
        self.started = false;
        self.remaining.reset();
        Ok(())
    }

    fn start(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "start"))?;
        if self.started {
            return Ok(());
        }
        self.started = true;
        flow.start(wiring.next, wiring.me)
    }

    fn receive(&mut self, flow: &mut Flow<'_>, _from: DuctId, incoming: Incoming<'_>) -> ExecResult<()> {
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "receive"))?;
        flow.receive(wiring.next, wiring.me, incoming)
    }

    fn complete(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let wiring = self.wiring.ok_or_else(|| not_ready(&self.name, "complete"))?;
        if !self.remaining.decrement()? {
            return Ok(());
        }
        self.started = false;
        self.remaining.reset();
        tracing::debug!(merge = %self.name, "all branches complete");
        flow.complete(wiring.next, wiring.me)
    }
}
