//! Windows bracket groupings between a gate and the stages after it.
//!
//! [`OpenWindow`] sits after a gate. In front of a reducing stage it turns
//! each grouping into `start_group`, one `receive` per value record and
//! `complete_group`; in front of anything else it flattens the grouping into
//! plain records. [`CloseWindow`] sits after the last Every stage and turns
//! each completed key chain into a plain record.

use sluice_core::id::DuctId;
use sluice_core::tuple::Row;

use crate::duct::{Duct, Flow, Grouping, Incoming, Links};
use crate::error::{ExecError, ExecResult};
use crate::stage::Wiring;

pub struct OpenWindow {
    name: String,
    reducing: bool,
    wiring: Option<Wiring>,
}

impl OpenWindow {
    /// `reducing` is whether the successor expects group brackets.
    pub fn new(name: impl Into<String>, reducing: bool) -> Self {
        Self {
            name: name.into(),
            reducing,
            wiring: None,
        }
    }

    fn wiring(&self) -> ExecResult<Wiring> {
        self.wiring
            .ok_or_else(|| ExecError::invariant(format!("{} used before bind", self.name)))
    }
}

impl Duct for OpenWindow {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, links: &Links) -> ExecResult<()> {
        self.wiring = Some(Wiring::bind(&self.name, links)?);
        Ok(())
    }

    fn start(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let w = self.wiring()?;
        flow.start(w.next, w.me)
    }

    fn receive(&mut self, flow: &mut Flow<'_>, _from: DuctId, incoming: Incoming<'_>) -> ExecResult<()> {
        let w = self.wiring()?;
        let group = incoming.grouping()?;
        let mut cursor = group.cursor();
        if !cursor.advance() {
            return Ok(());
        }
        if self.reducing {
            flow.start_group(w.next, w.me, group)?;
        }
        loop {
            flow.receive(w.next, w.me, Incoming::Entry(cursor.row()))?;
            if !cursor.advance() {
                break;
            }
        }
        if self.reducing {
            flow.complete_group(w.next, w.me, group, group.key())?;
        }
        Ok(())
    }

    fn complete(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let w = self.wiring()?;
        flow.complete(w.next, w.me)
    }
}

pub struct CloseWindow {
    name: String,
    wiring: Option<Wiring>,
}

impl CloseWindow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            wiring: None,
        }
    }

    fn wiring(&self) -> ExecResult<Wiring> {
        self.wiring
            .ok_or_else(|| ExecError::invariant(format!("{} used before bind", self.name)))
    }
}

impl Duct for CloseWindow {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, links: &Links) -> ExecResult<()> {
        self.wiring = Some(Wiring::bind(&self.name, links)?);
        Ok(())
    }

    fn is_reducing(&self) -> bool {
        true
    }

    fn start(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let w = self.wiring()?;
        flow.start(w.next, w.me)
    }

    fn start_group(&mut self, _flow: &mut Flow<'_>, _from: DuctId, _group: Grouping<'_>) -> ExecResult<()> {
        Ok(())
    }

    /// Value records are only of interest inside the chain.
    fn receive(&mut self, _flow: &mut Flow<'_>, _from: DuctId, _incoming: Incoming<'_>) -> ExecResult<()> {
        Ok(())
    }

    fn complete_group(
        &mut self,
        flow: &mut Flow<'_>,
        _from: DuctId,
        _group: Grouping<'_>,
        chain: &dyn Row,
    ) -> ExecResult<()> {
        let w = self.wiring()?;
        flow.receive(w.next, w.me, Incoming::Entry(chain))
    }

    fn complete(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let w = self.wiring()?;
        flow.complete(w.next, w.me)
    }
}
