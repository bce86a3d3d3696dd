//! Built-in functions.

use serde::{Deserialize, Serialize};
use sluice_core::entry::{Entry, EntryView};
use sluice_core::fields::Fields;
use sluice_core::process::FlowProcess;
use sluice_core::tuple::Tuple;
use sluice_core::value::Value;

use crate::error::{OperationError, OperationResult};
use crate::traits::{Function, Operation, OutputCollector};

/// Emits its arguments unchanged, optionally under new names.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    rename: Option<Fields>,
}

impl Identity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit the arguments declared as `fields`.
    pub fn renamed(fields: Fields) -> Self {
        Self { rename: Some(fields) }
    }
}

impl Operation for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn declared(&self) -> Fields {
        self.rename.clone().unwrap_or_else(Fields::args)
    }
}

impl Function for Identity {
    fn operate(
        &mut self,
        _process: &dyn FlowProcess,
        args: &EntryView<'_>,
        output: &mut dyn OutputCollector,
    ) -> OperationResult {
        if let Some(rename) = &self.rename {
            if rename.is_defined() && rename.size() != args.size() {
                return Err(OperationError::failed(format!(
                    "identity declares {} fields but received {}",
                    rename.size(),
                    args.size()
                )));
            }
        }
        output.add(args.row())
    }
}

/// Emits a constant record for every input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insert {
    names: Vec<String>,
    row: Tuple,
}

impl Insert {
    pub fn new(names: Vec<String>, values: Vec<Value>) -> OperationResult<Self> {
        if names.len() != values.len() {
            return Err(OperationError::Fatal(format!(
                "insert declares {} fields but {} values",
                names.len(),
                values.len()
            )));
        }
        Ok(Self {
            names,
            row: Tuple::from(values),
        })
    }
}

impl Operation for Insert {
    fn name(&self) -> &str {
        "insert"
    }

    fn declared(&self) -> Fields {
        Fields::new(self.names.iter()).unwrap_or_else(|_| Fields::size_of(self.names.len()))
    }
}

impl Function for Insert {
    fn operate(
        &mut self,
        _process: &dyn FlowProcess,
        _args: &EntryView<'_>,
        output: &mut dyn OutputCollector,
    ) -> OperationResult {
        output.add(&self.row)
    }
}
