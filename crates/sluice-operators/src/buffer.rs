//! Built-in buffers.

use sluice_core::entry::Entry;
use sluice_core::fields::Fields;
use sluice_core::process::FlowProcess;

use crate::error::OperationResult;
use crate::traits::{Buffer, BufferCall, Operation};

/// Emits the first `limit` argument records of every group.
#[derive(Debug, Clone, Copy)]
pub struct FirstN {
    limit: usize,
}

impl FirstN {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl Operation for FirstN {
    fn name(&self) -> &str {
        "first_n"
    }

    fn declared(&self) -> Fields {
        Fields::args()
    }
}

impl Buffer for FirstN {
    fn operate(&mut self, _process: &dyn FlowProcess, call: &mut BufferCall<'_>) -> OperationResult {
        let mut emitted = 0;
        while emitted < self.limit && call.advance()? {
            let Some(args) = call.arguments() else {
                break;
            };
            let row = args.row().to_tuple();
            call.emit(&row)?;
            emitted += 1;
        }
        Ok(())
    }
}
