//! Built-in assertions.

use sluice_core::entry::{Entry, EntryView};
use sluice_core::process::FlowProcess;
use sluice_core::tuple::preview;

use crate::error::{OperationError, OperationResult};
use crate::traits::{GroupAssertion, Operation, ValueAssertion};

/// Fails any record whose arguments contain a null.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssertNotNull;

impl Operation for AssertNotNull {
    fn name(&self) -> &str {
        "assert_not_null"
    }
}

impl ValueAssertion for AssertNotNull {
    fn check(&mut self, _process: &dyn FlowProcess, args: &EntryView<'_>) -> OperationResult {
        if args.row().has_null() {
            return Err(OperationError::Assertion(format!(
                "argument contains null: {}",
                preview(args.row(), 64)
            )));
        }
        Ok(())
    }
}

/// Fails any group whose size differs from `size`.
#[derive(Debug, Clone, Copy)]
pub struct AssertGroupSizeEquals {
    size: usize,
    seen: usize,
}

impl AssertGroupSizeEquals {
    pub fn new(size: usize) -> Self {
        Self { size, seen: 0 }
    }
}

impl Operation for AssertGroupSizeEquals {
    fn name(&self) -> &str {
        "assert_group_size_equals"
    }
}

impl GroupAssertion for AssertGroupSizeEquals {
    fn start(&mut self, _process: &dyn FlowProcess, _group: &EntryView<'_>) -> OperationResult {
        self.seen = 0;
        Ok(())
    }

    fn aggregate(&mut self, _process: &dyn FlowProcess, _args: &EntryView<'_>) -> OperationResult {
        self.seen += 1;
        Ok(())
    }

    fn complete(&mut self, _process: &dyn FlowProcess, group: &EntryView<'_>) -> OperationResult {
        if self.seen != self.size {
            return Err(OperationError::Assertion(format!(
                "group {} has {} records, expected {}",
                preview(group.row(), 64),
                self.seen,
                self.size
            )));
        }
        Ok(())
    }
}
