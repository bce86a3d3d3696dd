//! Fan-out to several successors.

use sluice_core::id::DuctId;
use sluice_core::tuple::Row;

use crate::duct::{Duct, Flow, Grouping, Incoming, Links};
use crate::error::{ExecError, ExecResult};

pub struct Fork {
    name: String,
    me: Option<DuctId>,
    succs: Vec<DuctId>,
}

impl Fork {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            me: None,
            succs: Vec::new(),
        }
    }

    fn me(&self) -> ExecResult<DuctId> {
        self.me
            .ok_or_else(|| ExecError::invariant(format!("{} used before bind", self.name)))
    }
}

impl Duct for Fork {
    fn name(&self) -> &str {
        &self.name
    }

    fn bind(&mut self, links: &Links) -> ExecResult<()> {
        if links.succs.len() < 2 {
            return Err(ExecError::config(format!(
                "{} needs at least two successors, has {}",
                self.name,
                links.succs.len()
            )));
        }
        self.me = Some(links.me);
        self.succs = links.succs.clone();
        Ok(())
    }

    fn start(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let me = self.me()?;
        for &next in &self.succs {
            flow.start(next, me)?;
        }
        Ok(())
    }

    fn receive(&mut self, flow: &mut Flow<'_>, _from: DuctId, incoming: Incoming<'_>) -> ExecResult<()> {
        let me = self.me()?;
        for &next in &self.succs {
            flow.receive(next, me, incoming)?;
        }
        Ok(())
    }

    fn complete(&mut self, flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        let me = self.me()?;
        for &next in &self.succs {
            flow.complete(next, me)?;
        }
        Ok(())
    }

    fn start_group(&mut self, flow: &mut Flow<'_>, _from: DuctId, group: Grouping<'_>) -> ExecResult<()> {
        let me = self.me()?;
        for &next in &self.succs {
            flow.start_group(next, me, group)?;
        }
        Ok(())
    }

    fn complete_group(
        &mut self,
        flow: &mut Flow<'_>,
        _from: DuctId,
        group: Grouping<'_>,
        chain: &dyn Row,
    ) -> ExecResult<()> {
        let me = self.me()?;
        for &next in &self.succs {
            flow.complete_group(next, me, group, chain)?;
        }
        Ok(())
    }
}
