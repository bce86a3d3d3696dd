//! Stages wrap operations, sources and sinks as ducts.
//!
//! Which stage wraps an operation is decided once, from its
//! [`sluice_operators::OperationKind`], when the graph is built.

pub mod buffer;
pub mod each;
pub mod every;
pub mod merge;
pub mod tap;

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use sluice_core::builder::OutgoingBuilder;
use sluice_core::id::DuctId;
use sluice_core::process::FlowProcess;
use sluice_core::tuple::Row;
use sluice_operators::{OperationError, OperationResult, OutputCollector};

use crate::duct::{Flow, Incoming, Links};
use crate::error::{ExecError, ExecResult};
use crate::trap::TrapHandler;

pub use buffer::BufferStage;
pub use each::EachStage;
pub use every::EveryStage;
pub use merge::MergeStage;
pub use tap::{SinkStage, SourceStage};

/// Ids a linear stage needs once bound.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Wiring {
    pub me: DuctId,
    pub next: DuctId,
}

impl Wiring {
    pub fn bind(name: &str, links: &Links) -> ExecResult<Self> {
        Ok(Self {
            me: links.me,
            next: links.only_successor(name)?,
        })
    }
}

pub(crate) fn not_ready(name: &str, what: &str) -> ExecError {
    ExecError::Lifecycle {
        duct: name.to_string(),
        message: format!("{what} before it was set up"),
    }
}

pub(crate) fn process_of<'a>(name: &str, process: &'a Option<Arc<dyn FlowProcess>>) -> ExecResult<&'a dyn FlowProcess> {
    process.as_deref().ok_or_else(|| not_ready(name, "called"))
}

/// Run an operation callback, turning a panic into `OperationError::Panicked`.
pub(crate) fn guarded<T>(f: impl FnOnce() -> OperationResult<T>) -> OperationResult<T> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|panic| Err(OperationError::Panicked(panic_message(&*panic))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Route the outcome of one operation call.
///
/// A failure recorded by the collector wins even when the operation
/// swallowed the `Downstream` marker.
pub(crate) fn settle(
    result: OperationResult,
    downstream: Option<ExecError>,
    trap: &TrapHandler,
    process: &dyn FlowProcess,
    record: &dyn Row,
) -> ExecResult<()> {
    if let Some(failure) = downstream {
        return Err(failure);
    }
    match result {
        Ok(()) => Ok(()),
        Err(OperationError::Downstream) => Err(ExecError::invariant(format!(
            "{} reported a downstream failure that never happened",
            trap.element()
        ))),
        Err(e) => trap.handle(process, e, record),
    }
}

/// Output collector that combines each result with the current input and
/// pushes it to the successor before returning.
pub(crate) struct Forward<'f, 'g> {
    pub flow: &'f mut Flow<'g>,
    pub wiring: Wiring,
    pub outgoing: &'f OutgoingBuilder,
    pub input: &'f dyn Row,
    pub failure: Option<ExecError>,
}

impl<'f, 'g> Forward<'f, 'g> {
    pub fn new(flow: &'f mut Flow<'g>, wiring: Wiring, outgoing: &'f OutgoingBuilder, input: &'f dyn Row) -> Self {
        Self {
            flow,
            wiring,
            outgoing,
            input,
            failure: None,
        }
    }
}

impl OutputCollector for Forward<'_, '_> {
    fn add(&mut self, row: &dyn Row) -> OperationResult {
        let out = self.outgoing.make_result(self.input, row)?;
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
