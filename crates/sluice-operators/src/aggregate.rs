//! Built-in aggregators. State is reset in `start`, so one instance serves
//! every group a stage sees.

use sluice_core::entry::{Entry, EntryView};
use sluice_core::fields::Fields;
use sluice_core::process::FlowProcess;
use sluice_core::tuple::{Row, Tuple};
use sluice_core::value::Value;

use crate::error::{OperationError, OperationResult};
use crate::traits::{Aggregator, Operation, OutputCollector};

/// Number of argument records in the group; with `skip_nulls`, records
/// whose arguments contain a null are not counted.
#[derive(Debug, Clone)]
pub struct Count {
    declared: Fields,
    skip_nulls: bool,
    count: i64,
}

impl Count {
    pub fn new(declared: Fields) -> Self {
        Self {
            declared,
            skip_nulls: false,
            count: 0,
        }
    }

    pub fn skip_nulls(mut self) -> Self {
        self.skip_nulls = true;
        self
    }
}

impl Default for Count {
    fn default() -> Self {
        Self::new(Fields::name("count"))
    }
}

impl Operation for Count {
    fn name(&self) -> &str {
        "count"
    }

    fn declared(&self) -> Fields {
        self.declared.clone()
    }
}

impl Aggregator for Count {
    fn start(&mut self, _process: &dyn FlowProcess, _group: &EntryView<'_>) -> OperationResult {
        self.count = 0;
        Ok(())
    }

    fn aggregate(&mut self, _process: &dyn FlowProcess, args: &EntryView<'_>) -> OperationResult {
        if !(self.skip_nulls && args.row().has_null()) {
            self.count += 1;
        }
        Ok(())
    }

    fn complete(
        &mut self,
        _process: &dyn FlowProcess,
        _group: &EntryView<'_>,
        output: &mut dyn OutputCollector,
    ) -> OperationResult {
        output.add(&Tuple::from(vec![Value::I64(self.count)]))
    }
}

fn value_as_f64(value: &Value) -> OperationResult<f64> {
    match value {
        Value::Null => Ok(0.0),
        Value::I32(v) => Ok(*v as f64),
        Value::I64(v) => Ok(*v as f64),
        Value::F32(v) => Ok(*v as f64),
        Value::F64(v) => Ok(*v),
        other => Err(OperationError::failed(format!(
            "unsupported numeric type for sum: {:?}",
            other
        ))),
    }
}

/// Sum of the first argument as `f64`; nulls count as zero.
#[derive(Debug, Clone)]
pub struct Sum {
    declared: Fields,
    sum: f64,
}

impl Sum {
    pub fn new(declared: Fields) -> Self {
        Self { declared, sum: 0.0 }
    }
}

impl Default for Sum {
    fn default() -> Self {
        Self::new(Fields::name("sum"))
    }
}

impl Operation for Sum {
    fn name(&self) -> &str {
        "sum"
    }

    fn declared(&self) -> Fields {
        self.declared.clone()
    }
}

impl Aggregator for Sum {
    fn start(&mut self, _process: &dyn FlowProcess, _group: &EntryView<'_>) -> OperationResult {
        self.sum = 0.0;
        Ok(())
    }

    fn aggregate(&mut self, _process: &dyn FlowProcess, args: &EntryView<'_>) -> OperationResult {
        self.sum += value_as_f64(args.get(0)?)?;
        Ok(())
    }

    fn complete(
        &mut self,
        _process: &dyn FlowProcess,
        _group: &EntryView<'_>,
        output: &mut dyn OutputCollector,
    ) -> OperationResult {
        output.add(&Tuple::from(vec![Value::F64(self.sum)]))
    }
}

/// The first argument record of each group.
#[derive(Debug, Clone, Default)]
pub struct First {
    first: Option<Tuple>,
}

impl Operation for First {
    fn name(&self) -> &str {
        "first"
    }

    fn declared(&self) -> Fields {
        Fields::args()
    }
}

impl Aggregator for First {
    fn start(&mut self, _process: &dyn FlowProcess, _group: &EntryView<'_>) -> OperationResult {
        self.first = None;
        Ok(())
    }

    fn aggregate(&mut self, _process: &dyn FlowProcess, args: &EntryView<'_>) -> OperationResult {
        if self.first.is_none() {
            self.first = Some(args.row().to_tuple());
        }
        Ok(())
    }

    fn complete(
        &mut self,
        _process: &dyn FlowProcess,
        _group: &EntryView<'_>,
        output: &mut dyn OutputCollector,
    ) -> OperationResult {
        match &self.first {
            Some(first) => output.add(first),
            None => Ok(()),
        }
    }
}
