//! Filters with simple predicate evaluation.
//!
//! Supports expressions of the form: "field OP literal" where OP ∈ {==, !=, <, <=, >, >=}

use serde::{Deserialize, Serialize};
use sluice_core::entry::{Entry, EntryView};
use sluice_core::process::FlowProcess;
use sluice_core::value::Value;

use crate::error::{OperationError, OperationResult};
use crate::traits::{Filter, Operation};

/// Keeps records for which `expr` holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredicateFilter {
    /// Simple predicate expression: "field op literal"
    pub expr: String,
    #[serde(skip)]
    parsed: Option<(String, String, String)>,
}

impl PredicateFilter {
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            parsed: None,
        }
    }
}

impl Operation for PredicateFilter {
    fn name(&self) -> &str {
        "predicate"
    }

    fn prepare(&mut self, _process: &dyn FlowProcess) -> OperationResult {
        self.parsed = Some(parse_simple_predicate(&self.expr)?);
        Ok(())
    }
}

impl Filter for PredicateFilter {
    fn is_remove(&mut self, _process: &dyn FlowProcess, args: &EntryView<'_>) -> OperationResult<bool> {
        if self.parsed.is_none() {
            self.parsed = Some(parse_simple_predicate(&self.expr)?);
        }
        let Some((field, op, literal)) = self.parsed.as_ref() else {
            return Ok(false);
        };
        let val = args.get(field.as_str())?;
        Ok(!eval_predicate(val, op, literal)?)
    }
}

/// Parse a simple predicate like "age > 18" or "name == Alice"
fn parse_simple_predicate(expr: &str) -> OperationResult<(String, String, String)> {
    let ops = ["==", "!=", "<=", ">=", "<", ">"];

    for op in &ops {
        if let Some(pos) = expr.find(op) {
            let col = expr[..pos].trim().to_string();
            let lit = expr[pos + op.len()..].trim().to_string();
            return Ok((col, op.to_string(), lit));
        }
    }

    Err(OperationError::Fatal(format!("unparseable predicate: {}", expr)))
}

fn compare<T: PartialOrd>(lhs: T, op: &str, rhs: T) -> OperationResult<bool> {
    Ok(match op {
        "==" => lhs == rhs,
        "!=" => lhs != rhs,
        "<" => lhs < rhs,
        "<=" => lhs <= rhs,
        ">" => lhs > rhs,
        ">=" => lhs >= rhs,
        _ => return Err(OperationError::failed(format!("unknown op: {}", op))),
    })
}

/// Evaluate a simple comparison predicate
fn eval_predicate(val: &Value, op: &str, literal: &str) -> OperationResult<bool> {
    use Value::*;

    match val {
        Null => Ok(false), // Null comparisons are false
        Bool(b) => {
            let lit_bool = literal
                .parse::<bool>()
                .map_err(|_| OperationError::failed(format!("cannot parse '{}' as bool", literal)))?;
            match op {
                "==" => Ok(*b == lit_bool),
                "!=" => Ok(*b != lit_bool),
                _ => Err(OperationError::failed(format!("unsupported op '{}' for bool", op))),
            }
        }
        I32(_) | I64(_) => {
            let lit_int = literal
                .parse::<i64>()
                .map_err(|_| OperationError::failed(format!("cannot parse '{}' as an integer", literal)))?;
            compare(val.as_i64().unwrap_or_default(), op, lit_int)
        }
        F32(_) | F64(_) => {
            let lit_float = literal
                .parse::<f64>()
                .map_err(|_| OperationError::failed(format!("cannot parse '{}' as a float", literal)))?;
            let f = val.as_f64().unwrap_or(f64::NAN);
            match op {
                "==" => Ok((f - lit_float).abs() < f64::EPSILON),
                "!=" => Ok((f - lit_float).abs() >= f64::EPSILON),
                _ => compare(f, op, lit_float),
            }
        }
        Str(s) => compare(s.as_str(), op, literal),
        Bin(_) | Tuple(_) => Err(OperationError::failed("cannot filter on binary or nested values")),
    }
}

/// Drops records whose arguments contain a null.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterNull;

impl Operation for FilterNull {
    fn name(&self) -> &str {
        "filter_null"
    }
}

impl Filter for FilterNull {
    fn is_remove(&mut self, _process: &dyn FlowProcess, args: &EntryView<'_>) -> OperationResult<bool> {
        Ok(args.row().has_null())
    }
}
