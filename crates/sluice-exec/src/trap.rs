//! Diverting failed records to trap taps.
//!
//! Each element stage owns a [`TrapHandler`]. Handlers whose traps share a
//! tap identifier share one open collector from the [`TrapRegistry`]; the
//! graph closes the registry once at cleanup.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use sluice_core::process::{Counter, FlowProcess};
use sluice_core::tuple::{preview, Row};
use sluice_io::{Tap, TupleCollector};
use sluice_operators::OperationError;

use crate::error::{ExecError, ExecResult};

type SharedCollector = Arc<Mutex<Box<dyn TupleCollector>>>;

#[derive(Default)]
pub struct TrapRegistry {
    open: BTreeMap<String, SharedCollector>,
}

impl TrapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The open collector for `tap`, opening it on first use.
    pub fn open(&mut self, tap: &dyn Tap) -> ExecResult<SharedCollector> {
        if let Some(existing) = self.open.get(tap.identifier()) {
            return Ok(existing.clone());
        }
        let collector = tap.open_for_write(&tap.source_fields())?;
        let shared = Arc::new(Mutex::new(collector));
        self.open.insert(tap.identifier().to_string(), shared.clone());
        tracing::debug!(trap = tap.identifier(), "opened trap");
        Ok(shared)
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Close every trap; the first failure is returned after all were tried.
    pub fn close_all(&mut self) -> ExecResult<()> {
        let mut first = None;
        for (id, shared) in std::mem::take(&mut self.open) {
            let result = shared.lock().unwrap_or_else(PoisonError::into_inner).close();
            if let Err(e) = result {
                tracing::warn!(trap = %id, error = %e, "failed to close trap");
                first.get_or_insert(ExecError::from(e));
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for TrapRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapRegistry")
            .field("open", &self.open.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct TrapHandler {
    element: String,
    branch: Option<String>,
    tap: Option<Arc<dyn Tap>>,
    collector: Option<SharedCollector>,
    preview_chars: usize,
}

impl TrapHandler {
    /// `tap` is the trap of the first of the element's branches that has one.
    pub fn new(element: impl Into<String>, branch: Option<String>, tap: Option<Arc<dyn Tap>>) -> Self {
        Self {
            element: element.into(),
            branch,
            tap,
            collector: None,
            preview_chars: 128,
        }
    }

    pub fn untrapped(element: impl Into<String>) -> Self {
        Self::new(element, None, None)
    }

    pub fn element(&self) -> &str {
        &self.element
    }

    pub fn prepare(&mut self, traps: &mut TrapRegistry, process: &dyn FlowProcess) -> ExecResult<()> {
        self.preview_chars = process.config().trap_preview_chars;
        self.collector = match &self.tap {
            Some(tap) => Some(traps.open(tap.as_ref())?),
            None => None,
        };
        Ok(())
    }

    /// Divert `record` (or the error's payload) or turn `error` into the
    /// failure that stops the graph.
    pub fn handle(&self, process: &dyn FlowProcess, error: OperationError, record: &dyn Row) -> ExecResult<()> {
        if !error.is_trappable() {
            return Err(ExecError::operation(&self.element, error));
        }
        let Some(collector) = &self.collector else {
            return Err(ExecError::operation(&self.element, error));
        };
        let diverted: &dyn Row = match error.payload() {
            Some(payload) => payload,
            None => record,
        };
        collector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .add(diverted)?;
        process.increment(Counter::TuplesTrapped, 1);
        tracing::warn!(
            element = %self.element,
            branch = self.branch.as_deref().unwrap_or(""),
            error = %error,
            record = %preview(diverted, self.preview_chars),
            "record diverted to trap"
        );
        Ok(())
    }

    pub fn release(&mut self) {
        self.collector = None;
    }
}

impl std::fmt::Debug for TrapHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapHandler")
            .field("element", &self.element)
            .field("branch", &self.branch)
            .field("trap", &self.tap.as_ref().map(|t| t.identifier().to_string()))
            .finish()
    }
}
