//! In-crate fixtures for driving single ducts without building a graph.

use std::sync::{Arc, Mutex};

use sluice_core::id::DuctId;
use sluice_core::tuple::{Row, Tuple};

use crate::duct::{Duct, DuctState, Flow, Incoming, Links, Pred};
use crate::error::ExecResult;

#[derive(Debug, Default)]
pub struct Captured {
    pub rows: Vec<Tuple>,
    /// Size of each grouping received, in arrival order.
    pub groups: Vec<usize>,
    pub starts: usize,
    pub completes: usize,
}

/// Terminal duct recording everything it is pushed; groupings are flattened.
pub struct Capture(pub Arc<Mutex<Captured>>);

impl Duct for Capture {
    fn name(&self) -> &str {
        "capture"
    }

    fn bind(&mut self, _links: &Links) -> ExecResult<()> {
        Ok(())
    }

    fn start(&mut self, _flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        self.0.lock().unwrap().starts += 1;
        Ok(())
    }

    fn receive(&mut self, _flow: &mut Flow<'_>, _from: DuctId, incoming: Incoming<'_>) -> ExecResult<()> {
        let mut captured = self.0.lock().unwrap();
        match incoming {
            Incoming::Entry(row) => captured.rows.push(row.to_tuple()),
            Incoming::Grouping(group) => {
                let mut cursor = group.cursor();
                let mut n = 0;
                while cursor.advance() {
                    captured.rows.push(cursor.row().to_tuple());
                    n += 1;
                }
                captured.groups.push(n);
            }
        }
        Ok(())
    }

    fn complete(&mut self, _flow: &mut Flow<'_>, _from: DuctId) -> ExecResult<()> {
        self.0.lock().unwrap().completes += 1;
        Ok(())
    }
}

/// Duct 0 under test feeding a [`Capture`] at duct 1. Upstream ids start at 10.
pub struct Harness {
    ducts: Vec<Option<Box<dyn Duct>>>,
    states: Vec<DuctState>,
    names: Vec<String>,
    pub captured: Arc<Mutex<Captured>>,
}

pub const UPSTREAM: usize = 10;

pub fn upstream(i: usize) -> DuctId {
    DuctId::from(UPSTREAM + i)
}

/// Links for duct 0 with one single-path predecessor per entry of `ordinals`.
pub fn links(ordinals: &[usize]) -> Links {
    Links {
        me: DuctId::from(0),
        preds: ordinals
            .iter()
            .enumerate()
            .map(|(i, &ordinal)| Pred {
                id: upstream(i),
                ordinal,
                paths: 1,
            })
            .collect(),
        succs: vec![DuctId::from(1)],
    }
}

impl Harness {
    /// `duct` must already be bound and initialized.
    pub fn new(duct: Box<dyn Duct>) -> Self {
        let captured = Arc::new(Mutex::new(Captured::default()));
        Self {
            ducts: vec![Some(duct), Some(Box::new(Capture(captured.clone())))],
            states: vec![DuctState::Prepared, DuctState::Prepared],
            names: vec!["under-test".into(), "capture".into()],
            captured,
        }
    }

    pub fn flow(&mut self) -> Flow<'_> {
        Flow::new(&mut self.ducts, &mut self.states, &self.names)
    }

    pub fn start(&mut self, from: usize) -> ExecResult<()> {
        self.flow().start(DuctId::from(0), upstream(from))
    }

    pub fn send(&mut self, from: usize, row: &Tuple) -> ExecResult<()> {
        self.flow().receive(DuctId::from(0), upstream(from), Incoming::Entry(row))
    }

    pub fn complete(&mut self, from: usize) -> ExecResult<()> {
        self.flow().complete(DuctId::from(0), upstream(from))
    }

    /// Start, send every row, complete: one upstream branch's whole run.
    pub fn feed(&mut self, from: usize, rows: &[Tuple]) -> ExecResult<()> {
        self.start(from)?;
        for row in rows {
            self.send(from, row)?;
        }
        self.complete(from)
    }

    pub fn rows(&self) -> Vec<Tuple> {
        self.captured.lock().unwrap().rows.clone()
    }
}
